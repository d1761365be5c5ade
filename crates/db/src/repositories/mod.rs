pub mod enrollment_repo;

pub use enrollment_repo::EnrollmentRepo;
