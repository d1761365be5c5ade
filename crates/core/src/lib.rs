//! Domain building blocks for drip email sequences.
//!
//! This crate has no internal dependencies so the repository layer, the
//! sequencer and the HTTP surface can all share it:
//!
//! - [`bundle`] -- a catalog paired with its templates, built-in or from JSON.
//! - [`email`] -- recipient address shape checks and normalization.
//! - [`sequences`] -- campaign definitions, the catalog and send-time math.
//! - [`templates`] -- per-step content and the [`templates::StepRenderer`] seam.

pub mod bundle;
pub mod email;
pub mod error;
pub mod sequences;
pub mod templates;
pub mod types;
