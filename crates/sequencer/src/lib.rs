//! Drip sequence scheduler.
//!
//! [`SequenceEngine`] owns the enrollment lifecycle: it enrolls subjects,
//! advances due enrollments one step per tick, and answers status queries.
//! Persistence goes through [`EnrollmentStore`] (Postgres in production, an
//! in-memory map for tests); content and delivery go through the
//! `StepRenderer` and `DeliveryChannel` seams.

pub mod engine;
pub mod store;

pub use engine::{
    EngineError, EngineSettings, EnrollOutcome, SequenceEngine, TickError, TickErrorKind,
    TickSummary,
};
pub use store::{EnrollmentStore, MemoryEnrollmentStore, PgEnrollmentStore, StoreError};
