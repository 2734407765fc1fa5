//! Job/chain scheduler.
//!
//! Moves jobs through Waiting, Ready, Active and Complete (or Aborted) by
//! staging them into free chains, submitting them to hosts and archiving the
//! converged results.

mod consistency;
mod core;
mod host_order;
mod report;
pub mod workdir;

pub use core::{parse_request, Request, Scheduler};
pub use host_order::machine_order;
pub use report::{
    AutoReport, CleanReport, ConsistencyReport, QueueReport, RetrieveReport, StageReport,
    SubmitReport, Summary,
};
