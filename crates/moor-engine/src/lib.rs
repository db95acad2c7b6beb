pub mod batch;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod readiness;
pub mod removal;
pub mod retry;
pub mod sweeper;

pub use batch::*;
pub use clock::*;
pub use config::*;
pub use orchestrator::*;
pub use readiness::*;
pub use removal::*;
pub use retry::*;
pub use sweeper::*;
