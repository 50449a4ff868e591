//! # Repository Module
//!
//! Database repositories. SQL lives here and nowhere else.
//!
//! ## Available Repositories
//!
//! - [`print_job::PrintJobRepository`] - Print job queue: submit, claim, mark, cleanup

pub mod print_job;
