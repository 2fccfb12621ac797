//! Offline-first sync for the portal API.
//!
//! Mutations are recorded in a durable SQLite queue while the device is
//! offline and replayed in enqueue order by a background driver once the
//! network is available.
//!
//! Pieces:
//! - [`SyncQueue`]: durable FIFO storage of operations
//! - [`RouteTable`]: maps operation tags to HTTP endpoints
//! - [`SyncExecutor`]: one drain pass over a snapshot of the queue
//! - [`SyncDriver`]: timer, connectivity and manual triggers, one pass at a time

pub mod connectivity;
pub mod driver;
pub mod executor;
pub mod operation;
pub mod queue;
pub mod retry;
pub mod routes;

pub use connectivity::{AlwaysOnline, Connectivity, ConnectivityFlag, NetworkMonitor};
pub use driver::{DrainOutcome, DriverState, SyncDriver, Trigger, TriggerSender};
pub use executor::{
    DrainReport, ExecutionResult, ExecutorConfig, OperationOutcome, SyncExecutor, Transport,
};
pub use operation::{OperationRequest, OperationStatus, OperationTag, QueueOperation};
pub use queue::{QueueStats, SyncQueue};
pub use retry::RetryPolicy;
pub use routes::{HttpMethod, ReplayRequest, Route, RouteTable, UnroutablePolicy};

#[cfg(test)]
mod tests;
