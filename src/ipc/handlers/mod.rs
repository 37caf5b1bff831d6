pub mod analytics;
pub mod core;
pub mod journal;
pub mod students;
