pub mod loop_runner;
pub mod runner;
pub mod subprocess;
