// Process management for kestrel
pub mod context;
pub mod lifecycle;
pub mod pcb;
pub mod queue;
pub mod scheduler;

pub use context::{Context, PerCpu};
pub use lifecycle::CONTEXT_FOOTPRINT;
pub use pcb::{ProcessEntry, ProcessError, ProcessId, ProcessInfo, ProcessState};
pub use queue::{NodeReservation, ProcessQueue, NODE_FOOTPRINT};
pub use scheduler::{rotate, SchedulerStats};
