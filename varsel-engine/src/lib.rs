//! # varsel-engine
//!
//! Worker runtime: startup sequencing (indicators/rules before consuming),
//! the sequential consume-match-produce loop, signal-driven shutdown and the
//! end-of-run report. Frontends only need the two `run_*_worker` entry
//! points; tests drive [`run_worker`] directly over the in-process broker.

mod error;
mod processor;
mod runtime;

pub use error::WorkerError;
pub use processor::{AddressProcessor, EventProcessor, ProcessError, RuleProcessor};
pub use runtime::{
    broker_endpoints, run_address_worker, run_address_worker_on, run_rule_worker,
    run_rule_worker_on, run_worker, shutdown_signal, stream_broker, RunSummary,
};
