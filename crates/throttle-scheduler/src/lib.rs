//! Concurrency throttle admission control for a shared build queue.
//!
//! The host scheduler asks a [`ThrottleGate`] whether a queued item may
//! start, and tells it when node blocks are entered and exited. Counts are
//! always derived from the live placeholders, never kept as counters.
//! [`HostQueue`] and [`Maintainer`] are a small in-memory host that drives
//! the gate the way a real build queue would.

pub mod gate;
pub mod maintainer;
pub mod placeholder;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod tracker;

pub use gate::{AdmissionGate, ThrottleGate};
pub use maintainer::Maintainer;
pub use placeholder::{NodeHold, PlaceholderSlot, PlaceholderTracker};
pub use queue::{HostQueue, MaintenanceReport, QueueItem, StartedRun};
pub use registry::{CategoryRegistry, SharedRegistry};
pub use resolver::{LimitKey, Resolution, ResolvedLimit, resolve};
pub use tracker::ConcurrencyState;
