//! Process-level concerns: the run lock and signal handling.

pub mod lock;
pub mod shutdown;

pub use lock::RunLock;
pub use shutdown::{ShutdownListener, ShutdownSignal, INTERRUPTED_EXIT_CODE};
