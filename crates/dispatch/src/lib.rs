//! hookbus Dispatch
//!
//! Driver side of the bus: runs dispatch cycles against engines, walks the
//! fallback chain and carries the driver configuration.

pub mod config;
pub mod coordinator;
pub mod fallback;
pub mod session;
pub mod testing;

pub use config::DriverConfig;
pub use coordinator::DispatchCoordinator;
pub use fallback::{Candidates, DispatchOutcome, FallbackPolicy, MORE_ENGINES};
pub use session::{SessionGuard, SessionLocks};
