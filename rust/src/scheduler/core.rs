//! Scheduler operations: Queue, Stage, Submit, Retrieve, Clean.
//!
//! State lives in job statuses and chain labels only. Every assignment change
//! is pushed to the chain label before the ledger is saved, so after a crash
//! the live labels are what the consistency checks reconcile against.

use std::fs;
use std::path::Path;

use crate::cards::{self, parse_overrides};
use crate::chain_registry::ChainRegistry;
use crate::config::Settings;
use crate::error::{PostboxError, Result};
use crate::job_store::JobStore;
use crate::models::{Chain, ChainNumber, JobStatus, Sid};
use crate::toolchain::{parse_occupancy, PowrToolchain, Toolchain};
use crate::{log_changes, log_checks, log_warn};

use super::host_order::machine_order;
use super::report::{
    AutoReport, CleanReport, QueueReport, RetrieveReport, StageReport, SubmitReport, Summary,
};
use super::workdir;

/// Width of the `FROM SID ` prefix before the predecessor id in a request.
const REQUEST_SID_START: usize = 9;
const REQUEST_SID_END: usize = 15;

/// A parsed line of the request file.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub depends_on: Sid,
    pub params: String,
    pub comment: String,
}

/// Parse `FROM SID nnnnnn | overrides | comment`.
pub fn parse_request(line: &str) -> Result<Request> {
    let malformed = |reason: String| PostboxError::MalformedRequest {
        line: line.trim_end().to_string(),
        reason,
    };

    let mut fields = line.splitn(3, '|');
    let head = fields.next().unwrap_or_default();
    let params = fields
        .next()
        .ok_or_else(|| malformed("missing override field".to_string()))?;
    let comment = fields.next().unwrap_or_default();

    let sid_field = head
        .get(REQUEST_SID_START..REQUEST_SID_END)
        .ok_or_else(|| malformed("predecessor id field too short".to_string()))?;
    let depends_on: Sid = sid_field
        .trim()
        .parse()
        .map_err(|_| malformed(format!("invalid predecessor id {:?}", sid_field)))?;

    let params = params.trim().to_uppercase();
    parse_overrides(&params).map_err(malformed)?;

    Ok(Request {
        depends_on,
        params,
        comment: comment.trim().to_string(),
    })
}

/// Job/chain scheduler over a job ledger and the live chain pool.
pub struct Scheduler<T: Toolchain = PowrToolchain> {
    pub(super) settings: Settings,
    pub(super) toolchain: T,
    pub(super) jobs: JobStore,
    pub(super) chains: ChainRegistry,
    /// Cross-match failures from the last check; non-empty blocks mutation.
    pub(super) violations: Vec<String>,
}

impl Scheduler<PowrToolchain> {
    /// Load settings from `config_file` and start against the real toolchain.
    pub fn open(config_file: &Path) -> Result<Self> {
        let settings = Settings::from_file(config_file)?;
        let toolchain = PowrToolchain::new(settings.powr_proc.clone(), settings.verbosity);
        Self::with_toolchain(settings, toolchain)
    }
}

impl<T: Toolchain> Scheduler<T> {
    /// Load the ledger, read the chain pool and run the startup checks.
    ///
    /// Cross-match violations do not fail construction; they are kept and
    /// make every mutating operation return `PostboxError::Integrity`.
    pub fn with_toolchain(settings: Settings, toolchain: T) -> Result<Self> {
        let jobs = JobStore::load(&settings.jobs_file, &settings.save_path)?;
        let chains = ChainRegistry::new(&settings);
        let mut scheduler = Self {
            settings,
            toolchain,
            jobs,
            chains,
            violations: Vec::new(),
        };
        scheduler.check_consistency()?;
        Ok(scheduler)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    pub fn toolchain_mut(&mut self) -> &mut T {
        &mut self.toolchain
    }

    /// Cross-match violations currently blocking mutating operations.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Re-read the chain pool and re-run the cross-match.
    pub fn refresh_chains(&mut self) -> Result<()> {
        self.chains.refresh(&self.toolchain)?;
        self.violations = self.cross_match();
        for violation in &self.violations {
            log_warn!("[SCHEDULER] Warning! {}. Check manually.", violation);
        }
        Ok(())
    }

    pub(super) fn ensure_intact(&self) -> Result<()> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(PostboxError::Integrity(self.violations.clone()))
        }
    }

    fn refresh_checked(&mut self) -> Result<()> {
        self.refresh_chains()?;
        self.ensure_intact()
    }

    fn verbosity(&self) -> u8 {
        self.settings.verbosity
    }

    /// Dependency chain of `sid`, starting with the job itself.
    pub fn trace(&self, sid: Sid) -> Result<Vec<Sid>> {
        self.jobs.dependency_chain(sid)
    }

    /// Job and chain counts from the current snapshot.
    pub fn summary(&self) -> Summary {
        let count = |status| self.jobs.filter_by_status(status).len();
        Summary {
            jobs_total: self.jobs.len(),
            waiting: count(JobStatus::Waiting),
            stageable: self
                .jobs
                .filter_by_status(JobStatus::Waiting)
                .into_iter()
                .filter(|j| self.jobs.ready_to_stage(j))
                .count(),
            ready: count(JobStatus::Ready),
            active: count(JobStatus::Active),
            complete: count(JobStatus::Complete),
            aborted: count(JobStatus::Aborted),
            chains_total: self.chains.len(),
            chains_active: self.chains.active().len(),
            chains_converged: self.chains.converged().len(),
            chains_crashed: self.chains.crashed().len(),
            chains_free: self.chains.free().len(),
        }
    }

    /// Turn every request in the schedule file into a Waiting job.
    ///
    /// Requests that cannot be parsed or name an unknown predecessor stay in
    /// the file below the header; everything else is consumed.
    pub fn queue(&mut self) -> Result<QueueReport> {
        self.ensure_intact()?;
        let verbosity = self.verbosity();
        let path = self.settings.schedule_file.clone();
        let text = fs::read_to_string(&path).map_err(|e| {
            PostboxError::Config(format!("cannot read schedule file {}: {}", path.display(), e))
        })?;

        let mut lines = text.split_inclusive('\n');
        let header: String = lines.by_ref().take(2).collect();
        let requests: Vec<&str> = lines.filter(|l| !l.trim().is_empty()).collect();

        let mut report = QueueReport::default();
        if requests.is_empty() {
            log_changes!(verbosity, "[QUEUE] No requests to queue.");
            return Ok(report);
        }

        let mut kept = header;
        for line in requests {
            let outcome = parse_request(line).and_then(|request| {
                if !self.jobs.contains(request.depends_on) {
                    return Err(PostboxError::JobNotFound(request.depends_on));
                }
                self.jobs
                    .create(Some(request.depends_on), &request.params, &request.comment)
            });
            match outcome {
                Ok(sid) => {
                    log_changes!(verbosity, "[QUEUE] New job with SID {:06} created.", sid);
                    report.created.push(sid);
                }
                Err(e) => {
                    log_warn!("[QUEUE] Warning! Request kept in schedule file: {}", e);
                    report
                        .rejected
                        .push((line.trim_end().to_string(), e.to_string()));
                    kept.push_str(line);
                    if !line.ends_with('\n') {
                        kept.push('\n');
                    }
                }
            }
        }

        if !report.created.is_empty() {
            self.jobs.save()?;
        }
        fs::write(&path, kept).map_err(|e| PostboxError::io(&path, e))?;
        Ok(report)
    }

    /// Bind stageable Waiting jobs to free chains and prepare their directories.
    pub fn stage(&mut self) -> Result<StageReport> {
        self.refresh_checked()?;
        let verbosity = self.verbosity();

        let free: Vec<ChainNumber> = self.chains.free().iter().map(|c| c.number).collect();
        let candidates: Vec<Sid> = self
            .jobs
            .filter_by_status(JobStatus::Waiting)
            .into_iter()
            .filter(|j| self.jobs.ready_to_stage(j))
            .map(|j| j.sid)
            .collect();

        let mut report = StageReport::default();
        if candidates.is_empty() {
            log_changes!(verbosity, "[STAGE] No waiting jobs ready to stage.");
            return Ok(report);
        }
        if free.is_empty() {
            log_changes!(verbosity, "[STAGE] No free chains available.");
            report.deferred = candidates;
            return Ok(report);
        }

        let mut next_chain = 0;
        for (idx, &sid) in candidates.iter().enumerate() {
            if next_chain == free.len() {
                report.deferred = candidates[idx..].to_vec();
                break;
            }
            let chain = free[next_chain];
            log_checks!(verbosity, "[STAGE] Trying SID {:06} on chain {}.", sid, chain);
            match self.stage_job(sid, chain) {
                Ok(()) => {
                    log_changes!(
                        verbosity,
                        "[STAGE] Job SID {:06} successfully loaded into chain {}.",
                        sid,
                        chain
                    );
                    report.staged.push((sid, chain));
                    next_chain += 1;
                }
                Err(e) => {
                    log_warn!("[STAGE] Warning! {}", e);
                    report.skipped.push((sid, e.to_string()));
                }
            }
        }

        if !report.staged.is_empty() {
            self.jobs.save()?;
        }
        Ok(report)
    }

    fn stage_job(&mut self, sid: Sid, number: ChainNumber) -> Result<()> {
        let job = self.jobs.job(sid)?.clone();
        let dep_sid = job
            .depends_on
            .ok_or_else(|| PostboxError::staging(sid, "job has no predecessor"))?;
        let source = self
            .jobs
            .job(dep_sid)?
            .output_path
            .clone()
            .ok_or_else(|| {
                PostboxError::staging(sid, format!("predecessor SID {:06} is not Complete", dep_sid))
            })?;

        let missing = workdir::missing_files(&source);
        if !missing.is_empty() {
            return Err(PostboxError::staging(
                sid,
                format!(
                    "dependency files missing from {}: {}",
                    source.display(),
                    missing.join(", ")
                ),
            ));
        }

        let chain: Chain = self
            .chains
            .get(number)
            .cloned()
            .ok_or(PostboxError::ChainNotFound(number))?;
        if let Some(holder) = chain.assigned_job() {
            return Err(PostboxError::staging(
                sid,
                format!("chain {} is occupied by SID {:06}", number, holder),
            ));
        }

        // Everything that can fail without touching the chain happens first.
        let overrides = parse_overrides(&job.params).map_err(|e| PostboxError::staging(sid, e))?;
        let cards = cards::render(&source.join(workdir::CARDS_FILE), &overrides, sid)?;

        workdir::wipe(&chain.path)?;
        workdir::populate(&source, &chain.path, &cards)?;

        self.chains
            .set_label(&mut self.toolchain, number, Some(sid))?;
        self.jobs.set_chain(sid, Some(number))?;
        self.jobs.set_status(sid, JobStatus::Ready)
    }

    /// Dispatch Ready jobs to hosts in load order.
    pub fn submit(&mut self) -> Result<SubmitReport> {
        self.ensure_intact()?;
        let verbosity = self.verbosity();

        let ready = self.jobs.sids_with_status(JobStatus::Ready);
        let mut report = SubmitReport::default();
        if ready.is_empty() {
            log_changes!(verbosity, "[SUBMIT] No ready jobs to submit.");
            return Ok(report);
        }

        let occupancy = parse_occupancy(&self.toolchain.occupancy()?);
        if occupancy.is_empty() {
            log_warn!("[SUBMIT] Warning! Occupancy query reported no hosts; nothing submitted.");
            report.no_hosts = true;
            report.deferred = ready;
            return Ok(report);
        }
        let order = machine_order(&occupancy, &self.settings.machine_priority);
        if order.is_empty() {
            log_warn!("[SUBMIT] Warning! No host has free capacity; nothing submitted.");
        }

        let mut failure = None;
        for (sid, host) in ready.iter().copied().zip(order) {
            if let Err(e) = self.submit_job(sid, &host) {
                failure = Some(e);
                break;
            }
            report.submitted.push((sid, host));
        }
        report.deferred = ready[report.submitted.len()..].to_vec();
        if !report.deferred.is_empty() && failure.is_none() {
            log_changes!(
                verbosity,
                "[SUBMIT] {} ready job(s) left for the next cycle.",
                report.deferred.len()
            );
        }

        if !report.submitted.is_empty() {
            self.jobs.save()?;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn submit_job(&mut self, sid: Sid, host: &str) -> Result<()> {
        let chain = self.jobs.job(sid)?.current_chain.ok_or_else(|| {
            PostboxError::Integrity(vec![format!("SID {:06} is Ready without a chain", sid)])
        })?;
        self.toolchain.submit(chain, host)?;
        self.jobs.set_status(sid, JobStatus::Active)?;
        log_changes!(
            self.verbosity(),
            "[SUBMIT] Job SID {:06} : wrstart chain {} submitted to {}.",
            sid,
            chain,
            host
        );
        Ok(())
    }

    /// Archive converged runs and mark their jobs Complete.
    pub fn retrieve(&mut self) -> Result<RetrieveReport> {
        self.refresh_checked()?;
        let verbosity = self.verbosity();

        let converged: Vec<(ChainNumber, Sid)> = self
            .chains
            .converged()
            .iter()
            .filter_map(|c| c.assigned_job().map(|sid| (c.number, sid)))
            .collect();

        let mut report = RetrieveReport::default();
        if converged.is_empty() {
            log_changes!(verbosity, "[RETRIEVE] No converged chains.");
            return Ok(report);
        }

        for (number, sid) in converged {
            let status = self.jobs.job(sid)?.status;
            if status != JobStatus::Active {
                log_checks!(
                    verbosity,
                    "[RETRIEVE] Chain {} converged but SID {:06} is {}; ignored.",
                    number,
                    sid,
                    status
                );
                report.stale.push(sid);
                continue;
            }
            match self.retrieve_job(sid, number) {
                Ok(()) => {
                    log_changes!(
                        verbosity,
                        "[RETRIEVE] Job SID {:06} retrieved from chain {}.",
                        sid,
                        number
                    );
                    report.retrieved.push(sid);
                }
                Err(e) => {
                    log_warn!("[RETRIEVE] Warning! SID {:06} could not be retrieved: {}", sid, e);
                    report.failed.push((sid, e.to_string()));
                }
            }
        }

        if report.is_idle() {
            log_changes!(
                verbosity,
                "[RETRIEVE] Nothing retrieved; {} converged chain(s) held jobs no longer Active.",
                report.stale.len()
            );
        }
        if !report.retrieved.is_empty() {
            self.jobs.save()?;
        }
        Ok(report)
    }

    fn retrieve_job(&mut self, sid: Sid, number: ChainNumber) -> Result<()> {
        let chain_dir = self
            .chains
            .get(number)
            .map(|c| c.path.clone())
            .ok_or(PostboxError::ChainNotFound(number))?;
        let dest = self.settings.archive_path(sid);

        let missing_logs = workdir::archive(&chain_dir, &dest, &self.settings.powr_out_path, number)?;
        for log in missing_logs {
            log_warn!("[RETRIEVE] Warning! Output log {} not found for SID {:06}.", log, sid);
        }

        self.chains.set_label(&mut self.toolchain, number, None)?;
        self.jobs.set_chain(sid, None)?;
        self.jobs.set_status(sid, JobStatus::Complete)
    }

    /// Abort one job, or with no target every Active job on a crashed chain.
    ///
    /// The bulk form asks `confirm` with the candidate SIDs before touching
    /// anything; a `false` answer leaves all state as it was.
    pub fn clean<F>(&mut self, target: Option<Sid>, confirm: F) -> Result<CleanReport>
    where
        F: FnOnce(&[Sid]) -> bool,
    {
        self.try_clean(target, |sids| Ok(confirm(sids)))
    }

    /// Like `clean`, with a confirmation that can fail.
    ///
    /// A failed confirmation is returned as is and nothing is aborted.
    pub fn try_clean<F, E>(
        &mut self,
        target: Option<Sid>,
        confirm: F,
    ) -> std::result::Result<CleanReport, E>
    where
        F: FnOnce(&[Sid]) -> std::result::Result<bool, E>,
        E: From<PostboxError>,
    {
        self.refresh_checked()?;
        let verbosity = self.verbosity();
        let mut report = CleanReport::default();

        let sids = match target {
            Some(sid) => {
                if !self.jobs.contains(sid) {
                    log_warn!("[CLEAN] Warning! No job with SID {:06}.", sid);
                    return Err(PostboxError::JobNotFound(sid).into());
                }
                vec![sid]
            }
            None => {
                let crashed: Vec<Sid> = self
                    .chains
                    .crashed()
                    .iter()
                    .filter_map(|c| c.assigned_job())
                    .filter(|sid| {
                        self.jobs
                            .get(*sid)
                            .is_some_and(|j| j.status == JobStatus::Active)
                    })
                    .collect();
                if crashed.is_empty() {
                    log_changes!(verbosity, "[CLEAN] No active crashed jobs to clean.");
                    return Ok(report);
                }
                if !confirm(&crashed)? {
                    log_changes!(verbosity, "[CLEAN] Not confirmed; nothing aborted.");
                    report.declined = true;
                    return Ok(report);
                }
                crashed
            }
        };

        let mut failure = None;
        for sid in sids {
            if let Err(e) = self.abort_job(sid) {
                failure = Some(e);
                break;
            }
            log_changes!(verbosity, "[CLEAN] Aborted SID {:06}.", sid);
            report.aborted.push(sid);
        }

        if !report.aborted.is_empty() {
            self.jobs.save()?;
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    fn abort_job(&mut self, sid: Sid) -> Result<()> {
        if let Some(number) = self.jobs.job(sid)?.current_chain {
            self.chains.set_label(&mut self.toolchain, number, None)?;
            self.jobs.set_chain(sid, None)?;
        }
        self.jobs.set_status(sid, JobStatus::Aborted)
    }

    /// One unattended cycle: Retrieve, Queue, Stage, Submit.
    pub fn auto(&mut self) -> Result<AutoReport> {
        Ok(AutoReport {
            retrieve: self.retrieve()?,
            queue: self.queue()?,
            stage: self.stage()?,
            submit: self.submit()?,
        })
    }
}
