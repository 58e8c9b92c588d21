pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod state;
