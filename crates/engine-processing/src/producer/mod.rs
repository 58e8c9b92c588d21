pub mod config;
pub mod enqueuer;
pub mod planner;
