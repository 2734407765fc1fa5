//! Scheduler for chains of dependent PoWR stellar-atmosphere runs.
//!
//! Jobs live in a pipe-delimited ledger; compute slots ("chains") are owned by
//! an external toolchain and reported through its status query. A job's chain
//! assignment is recorded in the chain's label as `[SID nnnnnn]`.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

pub mod cards;
pub mod chain_registry;
pub mod config;
pub mod error;
pub mod job_store;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod toolchain;

#[cfg(test)]
mod test_support;

pub use chain_registry::ChainRegistry;
pub use config::Settings;
pub use error::{PostboxError, Result};
pub use job_store::JobStore;
pub use models::{Chain, ChainNumber, Job, JobStatus, Sid};
pub use scheduler::{
    AutoReport, CleanReport, ConsistencyReport, QueueReport, RetrieveReport, Scheduler,
    StageReport, SubmitReport, Summary,
};
pub use toolchain::{PowrToolchain, Toolchain};

#[cfg(feature = "python")]
mod bindings {
    use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use crate::error::PostboxError;
    use crate::models::{ChainNumber, Sid};
    use crate::scheduler::Scheduler;
    use crate::toolchain::PowrToolchain;

    impl From<PostboxError> for PyErr {
        fn from(e: PostboxError) -> Self {
            match e {
                PostboxError::JobNotFound(_) | PostboxError::ChainNotFound(_) => {
                    PyKeyError::new_err(e.to_string())
                }
                PostboxError::Config(_)
                | PostboxError::InvalidField { .. }
                | PostboxError::MalformedLedger { .. }
                | PostboxError::MalformedStatus { .. }
                | PostboxError::MalformedRequest { .. } => PyValueError::new_err(e.to_string()),
                _ => PyRuntimeError::new_err(e.to_string()),
            }
        }
    }

    /// Scheduler handle for the Python frontend.
    #[pyclass(name = "Scheduler")]
    pub struct PyScheduler {
        inner: Scheduler<PowrToolchain>,
    }

    #[pymethods]
    impl PyScheduler {
        /// Open the scheduler from a config file and run the startup checks.
        #[new]
        fn new(config_file: PathBuf) -> PyResult<Self> {
            let inner = Scheduler::open(&config_file)?;
            Ok(Self { inner })
        }

        /// SIDs of the jobs created from the request file.
        fn queue(&mut self) -> PyResult<Vec<Sid>> {
            Ok(self.inner.queue()?.created)
        }

        /// `(sid, chain)` pairs that were staged.
        fn stage(&mut self) -> PyResult<Vec<(Sid, ChainNumber)>> {
            Ok(self.inner.stage()?.staged)
        }

        /// `(sid, host)` pairs that were submitted.
        fn submit(&mut self) -> PyResult<Vec<(Sid, String)>> {
            Ok(self.inner.submit()?.submitted)
        }

        /// SIDs that were archived and marked Complete.
        fn retrieve(&mut self) -> PyResult<Vec<Sid>> {
            Ok(self.inner.retrieve()?.retrieved)
        }

        /// Abort `sid`, or every Active job on a crashed chain.
        ///
        /// The bulk form calls `confirm(sids)` and aborts nothing unless it
        /// returns true. Without `confirm` the bulk form is declined.
        #[pyo3(signature = (sid=None, confirm=None))]
        fn clean(
            &mut self,
            py: Python<'_>,
            sid: Option<Sid>,
            confirm: Option<PyObject>,
        ) -> PyResult<Vec<Sid>> {
            let ask = |sids: &[Sid]| -> PyResult<bool> {
                match &confirm {
                    Some(callback) => callback
                        .call1(py, (sids.to_vec(),))?
                        .extract::<bool>(py),
                    None => Ok(false),
                }
            };
            Ok(self.inner.try_clean(sid, ask)?.aborted)
        }

        /// Re-run the startup checks against a fresh chain snapshot.
        ///
        /// Returns `(demoted, promoted, violations)`.
        fn check_consistency(&mut self) -> PyResult<(Vec<Sid>, Vec<Sid>, Vec<String>)> {
            let report = self.inner.check_consistency()?;
            Ok((report.demoted, report.promoted, report.violations))
        }

        /// Re-read the chain pool and re-run the cross-match.
        fn refresh_chains(&mut self) -> PyResult<()> {
            Ok(self.inner.refresh_chains()?)
        }

        /// Retrieve, Queue, Stage and Submit in one call.
        fn auto(&mut self) -> PyResult<(Vec<Sid>, Vec<Sid>, Vec<Sid>, Vec<Sid>)> {
            let report = self.inner.auto()?;
            Ok((
                report.retrieve.retrieved,
                report.queue.created,
                report.stage.staged.into_iter().map(|(sid, _)| sid).collect(),
                report.submit.submitted.into_iter().map(|(sid, _)| sid).collect(),
            ))
        }

        /// Job and chain counts keyed by name.
        fn summary(&self) -> HashMap<&'static str, usize> {
            let s = self.inner.summary();
            HashMap::from([
                ("jobs_total", s.jobs_total),
                ("waiting", s.waiting),
                ("stageable", s.stageable),
                ("ready", s.ready),
                ("active", s.active),
                ("complete", s.complete),
                ("aborted", s.aborted),
                ("chains_total", s.chains_total),
                ("chains_active", s.chains_active),
                ("chains_converged", s.chains_converged),
                ("chains_crashed", s.chains_crashed),
                ("chains_free", s.chains_free),
            ])
        }

        fn trace(&self, sid: Sid) -> PyResult<Vec<Sid>> {
            Ok(self.inner.trace(sid)?)
        }

        fn violations(&self) -> Vec<String> {
            self.inner.violations().to_vec()
        }

        /// `(sid, status, chain, depends_on, params, comment)` for every job.
        #[allow(clippy::type_complexity)]
        fn jobs(&self) -> Vec<(Sid, String, Option<ChainNumber>, Option<Sid>, String, String)> {
            self.inner
                .jobs()
                .jobs()
                .map(|j| {
                    (
                        j.sid,
                        j.status.to_string(),
                        j.current_chain,
                        j.depends_on,
                        j.params.clone(),
                        j.comment.clone(),
                    )
                })
                .collect()
        }

        /// `(number, host, label)` for every chain in the usable range.
        ///
        /// Reads the snapshot taken by the last refresh; call
        /// `refresh_chains` first for live state.
        fn chains(&self) -> Vec<(ChainNumber, String, String)> {
            self.inner
                .chains()
                .chains()
                .map(|c| (c.number, c.host.clone(), c.label.clone()))
                .collect()
        }
    }

    /// The postbox.rust Python module.
    #[pymodule]
    fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<PyScheduler>()?;
        Ok(())
    }
}
