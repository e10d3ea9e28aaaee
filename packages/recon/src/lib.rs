// ABOUTME: Concurrent reconnaissance layer for pentest runs
// ABOUTME: Reachability probing, batch construction, dispatch, and report aggregation

pub mod batch;
pub mod orchestrator;
pub mod probe;

pub use batch::{BatchKind, CommandSpec, ReconBatch};
pub use orchestrator::{FailedCommand, ReconOrchestrator, ReconReport, ReconSection};
pub use probe::{host_of, ProbeError, ReachabilityProbe};
