pub mod core;
pub mod grading;
pub mod setup;
