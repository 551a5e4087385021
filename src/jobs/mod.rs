//! Background maintenance jobs.

pub mod archival;

pub use archival::{ArchivalJob, ArchivalReport};
