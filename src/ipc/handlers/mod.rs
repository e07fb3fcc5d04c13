pub mod catalog;
pub mod core;
pub mod exams;
pub mod overlaps;
pub mod sessions;
pub mod setup;
