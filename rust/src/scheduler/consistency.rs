//! Startup self-healing and the job/chain cross-match.

use crate::error::Result;
use crate::models::{sid_tag, JobStatus, Sid};
use crate::toolchain::Toolchain;
use crate::{log_changes, log_warn};

use super::core::Scheduler;
use super::report::ConsistencyReport;

impl<T: Toolchain> Scheduler<T> {
    /// Reconcile the ledger with the live chain labels.
    ///
    /// Ready jobs that lost their chain go back to Waiting; Ready jobs whose
    /// chain is already running become Active. Anything else that disagrees is
    /// reported as a violation and left for manual repair.
    pub fn check_consistency(&mut self) -> Result<ConsistencyReport> {
        let verbosity = self.settings.verbosity;
        self.chains.refresh(&self.toolchain)?;
        let mut report = ConsistencyReport::default();

        for sid in self.jobs.sids_with_status(JobStatus::Ready) {
            if self.jobs.job(sid)?.current_chain.is_none() {
                log_warn!(
                    "[SCHEDULER] Warning! SID {:06} is Ready without a chain; set back to Waiting.",
                    sid
                );
                self.jobs.set_status(sid, JobStatus::Waiting)?;
                report.demoted.push(sid);
            }
        }

        report.violations = self.cross_match();
        for violation in &report.violations {
            log_warn!("[SCHEDULER] Warning! {}. Check manually.", violation);
        }

        // Promotion trusts the labels, so only do it when they all agree.
        if report.violations.is_empty() {
            let running: Vec<Sid> = self
                .chains
                .active()
                .iter()
                .filter_map(|c| c.assigned_job())
                .filter(|sid| {
                    self.jobs
                        .get(*sid)
                        .is_some_and(|j| j.status == JobStatus::Ready)
                })
                .collect();
            for sid in running {
                log_changes!(verbosity, "[SCHEDULER] SID {:06} is running; set to Active.", sid);
                self.jobs.set_status(sid, JobStatus::Active)?;
                report.promoted.push(sid);
            }
        }

        if !report.demoted.is_empty() || !report.promoted.is_empty() {
            self.jobs.save()?;
        }
        self.violations = report.violations.clone();
        Ok(report)
    }

    /// Every disagreement between job bindings and chain labels.
    pub(super) fn cross_match(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for chain in self.chains.chains() {
            let Some(sid) = chain.assigned_job() else {
                continue;
            };
            match self.jobs.get(sid) {
                None => violations.push(format!(
                    "chain {} is tagged for SID {:06}, which is not in the jobs file",
                    chain.number, sid
                )),
                Some(job) if job.current_chain != Some(chain.number) => {
                    violations.push(format!(
                        "chain {} is tagged for SID {:06}, but the job is {} on chain {}",
                        chain.number,
                        sid,
                        job.status,
                        job.current_chain
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "none".to_string())
                    ))
                }
                Some(_) => {}
            }
        }

        for job in self.jobs.jobs() {
            let Some(number) = job.current_chain else {
                continue;
            };
            if !job.status.holds_chain() {
                violations.push(format!(
                    "SID {:06} is {} but still bound to chain {}",
                    job.sid, job.status, number
                ));
                continue;
            }
            match self.chains.get(number) {
                None => violations.push(format!(
                    "SID {:06} is bound to chain {}, which the status query does not report",
                    job.sid, number
                )),
                Some(chain) if chain.assigned_job() != Some(job.sid) => {
                    violations.push(format!(
                        "SID {:06} is bound to chain {}, whose label lacks {}",
                        job.sid,
                        number,
                        sid_tag(job.sid)
                    ))
                }
                Some(_) => {}
            }
        }
        violations
    }
}
