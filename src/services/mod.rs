//! Core services for the tandem coordination server.

pub mod change_signal;
pub mod coordinator;
pub mod notifier;
pub mod scheduler;
pub mod session_registry;
pub mod watchdog;
pub mod worktree;

pub use change_signal::ChangeSignal;
pub use coordinator::{Coordinator, PruneSettings};
pub use notifier::Notifier;
pub use scheduler::TaskScheduler;
pub use session_registry::{PairUpdate, SessionRegistry, PUSH_CHANNEL_CAPACITY};
pub use watchdog::Watchdog;
pub use worktree::WorktreeManager;
