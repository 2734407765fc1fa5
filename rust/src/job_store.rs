//! Persistent job collection backed by a pipe-delimited ledger file.
//!
//! The ledger is a two-line header, kept verbatim, followed by one record per
//! job: `id|status|chain|dependsOn|params|comment`. Numeric fields are
//! zero-padded to six digits; unset optional fields are empty.

use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PostboxError, Result};
use crate::models::{ChainNumber, Job, JobStatus, Sid, SID_CEILING};

/// Header written when a ledger is created from scratch.
pub const DEFAULT_HEADER: &str = "SID   |Status  |Chain |From  |Params|Comment\n\
-------------------------------------------\n";

const FIELD_COUNT: usize = 6;

/// Owns every job and the ledger they are persisted to.
#[derive(Clone, Debug)]
pub struct JobStore {
    path: PathBuf,
    archive_root: PathBuf,
    header: String,
    /// Insertion order is ledger order.
    jobs: IndexMap<Sid, Job, FxBuildHasher>,
}

impl JobStore {
    /// Create an empty store that will save to `path`.
    pub fn new(path: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive_root: archive_root.into(),
            header: DEFAULT_HEADER.to_string(),
            jobs: IndexMap::default(),
        }
    }

    /// Load the ledger at `path`. A missing ledger is a configuration error.
    pub fn load(path: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(path, archive_root);
        let text = fs::read_to_string(&store.path).map_err(|e| {
            PostboxError::Config(format!(
                "cannot read jobs file {}: {}",
                store.path.display(),
                e
            ))
        })?;
        store.parse(&text)?;
        Ok(store)
    }

    fn parse(&mut self, text: &str) -> Result<()> {
        let mut lines = text.split_inclusive('\n');
        let mut header = String::new();
        for _ in 0..2 {
            let line = lines.next().ok_or_else(|| PostboxError::MalformedLedger {
                line: 0,
                reason: "ledger is missing its two-line header".to_string(),
            })?;
            header.push_str(line);
            if !line.ends_with('\n') {
                header.push('\n');
            }
        }
        self.header = header;
        self.jobs.clear();

        for (idx, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            // Header occupies lines 1 and 2.
            let mut job = parse_record(line, idx + 3)?;
            if self.jobs.contains_key(&job.sid) {
                return Err(PostboxError::MalformedLedger {
                    line: idx + 3,
                    reason: format!("duplicate SID {:06}", job.sid),
                });
            }
            job.output_path = self.output_path_for(&job);
            self.jobs.insert(job.sid, job);
        }
        Ok(())
    }

    /// Render the full ledger text.
    pub fn render(&self) -> String {
        let mut out = self.header.clone();
        for job in self.jobs.values() {
            out.push_str(&render_record(job));
            out.push('\n');
        }
        out
    }

    /// Write the whole ledger back to disk.
    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, self.render()).map_err(|e| PostboxError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Smallest SID in `[1, SID_CEILING)` not used yet.
    pub fn allocate_id(&self) -> Result<Sid> {
        (1..SID_CEILING)
            .find(|sid| !self.jobs.contains_key(sid))
            .ok_or_else(|| {
                PostboxError::Config(format!("SID space [1, {}) exhausted", SID_CEILING))
            })
    }

    /// Insert a new Waiting job and return its SID.
    ///
    /// `params` may not contain `|`, and neither field may contain a line
    /// break; both would change the record on the next load.
    pub fn create(&mut self, depends_on: Option<Sid>, params: &str, comment: &str) -> Result<Sid> {
        check_field("params", params, true)?;
        check_field("comment", comment, false)?;
        let sid = self.allocate_id()?;
        let job = Job::new(sid, depends_on, params.to_string(), comment.to_string());
        self.jobs.insert(sid, job);
        Ok(sid)
    }

    pub fn get(&self, sid: Sid) -> Option<&Job> {
        self.jobs.get(&sid)
    }

    /// Like `get`, but an unknown SID is a lookup error.
    pub fn job(&self, sid: Sid) -> Result<&Job> {
        self.jobs.get(&sid).ok_or(PostboxError::JobNotFound(sid))
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.jobs.contains_key(&sid)
    }

    /// All jobs in ledger order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs with `status`, in ledger order.
    pub fn filter_by_status(&self, status: JobStatus) -> Vec<&Job> {
        self.jobs.values().filter(|j| j.status == status).collect()
    }

    /// SIDs of jobs with `status`, in ledger order.
    pub fn sids_with_status(&self, status: JobStatus) -> Vec<Sid> {
        self.filter_by_status(status).iter().map(|j| j.sid).collect()
    }

    /// A job can be staged once its predecessor exists and is Complete.
    pub fn ready_to_stage(&self, job: &Job) -> bool {
        job.depends_on
            .and_then(|dep| self.jobs.get(&dep))
            .is_some_and(|dep| dep.status == JobStatus::Complete)
    }

    /// Follow `depends_on` links from `sid` back to a job without predecessor.
    ///
    /// The result starts with `sid` itself. A dangling link or a cycle is an
    /// error rather than a truncated walk.
    pub fn dependency_chain(&self, sid: Sid) -> Result<Vec<Sid>> {
        let mut chain = Vec::new();
        let mut seen = FxHashSet::default();
        let mut current = self.job(sid)?;

        loop {
            if !seen.insert(current.sid) {
                return Err(PostboxError::Integrity(vec![format!(
                    "dependency cycle through SID {:06}",
                    current.sid
                )]));
            }
            chain.push(current.sid);
            match current.depends_on {
                Some(dep) => current = self.job(dep)?,
                None => return Ok(chain),
            }
        }
    }

    /// Change a job's status and keep its output path in step.
    pub fn set_status(&mut self, sid: Sid, status: JobStatus) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&sid)
            .ok_or(PostboxError::JobNotFound(sid))?;
        job.status = status;
        self.update_output_path(sid);
        Ok(())
    }

    /// Bind a job to a chain, or unbind it with `None`.
    pub fn set_chain(&mut self, sid: Sid, chain: Option<ChainNumber>) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&sid)
            .ok_or(PostboxError::JobNotFound(sid))?;
        job.current_chain = chain;
        Ok(())
    }

    /// Recompute `output_path` from the job's current status.
    pub fn update_output_path(&mut self, sid: Sid) {
        let path = match self.jobs.get(&sid) {
            Some(job) => self.output_path_for(job),
            None => return,
        };
        if let Some(job) = self.jobs.get_mut(&sid) {
            job.output_path = path;
        }
    }

    fn output_path_for(&self, job: &Job) -> Option<PathBuf> {
        (job.status == JobStatus::Complete)
            .then(|| self.archive_root.join(format!("{:06}", job.sid)))
    }
}

fn check_field(field: &'static str, value: &str, forbid_separator: bool) -> Result<()> {
    let invalid = |reason| PostboxError::InvalidField {
        field,
        value: value.to_string(),
        reason,
    };
    if value.contains(['\n', '\r']) {
        return Err(invalid("line breaks are not allowed"));
    }
    if forbid_separator && value.contains('|') {
        return Err(invalid("'|' is the ledger field separator"));
    }
    Ok(())
}

fn parse_record(raw: &str, line: usize) -> Result<Job> {
    let malformed = |reason: String| PostboxError::MalformedLedger { line, reason };

    // Only the line ending goes; trailing blanks belong to the comment.
    let record = raw.trim_end_matches(['\n', '\r']);
    let fields: Vec<&str> = record.splitn(FIELD_COUNT, '|').collect();
    if fields.len() != FIELD_COUNT {
        return Err(malformed(format!(
            "expected {} fields, found {}",
            FIELD_COUNT,
            fields.len()
        )));
    }

    let sid: Sid = fields[0]
        .trim()
        .parse()
        .map_err(|_| malformed(format!("invalid SID {:?}", fields[0])))?;
    let status: JobStatus = fields[1].trim().parse().map_err(malformed)?;
    let current_chain = parse_optional_number(fields[2])
        .map_err(|_| malformed(format!("invalid chain {:?}", fields[2])))?;
    let depends_on = parse_optional_number(fields[3])
        .map_err(|_| malformed(format!("invalid dependency {:?}", fields[3])))?;

    Ok(Job {
        sid,
        status,
        current_chain,
        depends_on,
        params: fields[4].to_string(),
        comment: fields[5].to_string(),
        output_path: None,
    })
}

fn parse_optional_number(field: &str) -> std::result::Result<Option<u32>, std::num::ParseIntError> {
    let field = field.trim();
    if field.is_empty() {
        Ok(None)
    } else {
        field.parse().map(Some)
    }
}

fn render_record(job: &Job) -> String {
    let padded = |n: Option<u32>| n.map(|n| format!("{:06}", n)).unwrap_or_default();
    format!(
        "{:06}|{}|{}|{}|{}|{}",
        job.sid,
        job.status,
        padded(job.current_chain),
        padded(job.depends_on),
        job.params,
        job.comment
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LEDGER: &str = "\
SID|Status|Chain|From|Params|Comment
----
000001|Complete|||TEFF=20000|seed model

000002|Active|000004|000001|TEFF=21000,LOGG=3.9|first step
000005|Waiting||000002||
000003|Aborted||000001|HYDROGEN=0.6|crashed | twice
";

    fn make_store(text: &str) -> JobStore {
        let mut store = JobStore::new("/tmp/unused-ledger", "/data/models");
        store.parse(text).unwrap();
        store
    }

    fn tuples(store: &JobStore) -> Vec<(Sid, JobStatus, Option<u32>, Option<u32>, String, String)> {
        store
            .jobs()
            .map(|j| {
                (
                    j.sid,
                    j.status,
                    j.current_chain,
                    j.depends_on,
                    j.params.clone(),
                    j.comment.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_tolerates_blank_lines_and_keeps_order() {
        let store = make_store(LEDGER);
        let order: Vec<Sid> = store.jobs().map(|j| j.sid).collect();
        assert_eq!(order, vec![1, 2, 5, 3]);

        let active = store.job(2).unwrap();
        assert_eq!(active.current_chain, Some(4));
        assert_eq!(active.depends_on, Some(1));
        assert_eq!(active.params, "TEFF=21000,LOGG=3.9");
        assert_eq!(store.job(3).unwrap().comment, "crashed | twice");
    }

    #[test]
    fn test_output_path_only_for_complete() {
        let store = make_store(LEDGER);
        assert_eq!(
            store.job(1).unwrap().output_path,
            Some(PathBuf::from("/data/models/000001"))
        );
        assert_eq!(store.job(2).unwrap().output_path, None);
    }

    #[test]
    fn test_render_pads_numbers_and_blanks_unset_fields() {
        let store = make_store(LEDGER);
        let text = store.render();
        assert!(text.starts_with("SID|Status|Chain|From|Params|Comment\n----\n"));
        assert!(text.contains("000002|Active|000004|000001|TEFF=21000,LOGG=3.9|first step\n"));
        assert!(text.contains("000005|Waiting||000002||\n"));
        assert!(!text.contains("None"));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs");
        let store = {
            let mut s = JobStore::new(&path, "/data/models");
            s.parse(LEDGER).unwrap();
            s
        };
        store.save().unwrap();

        let reloaded = JobStore::load(&path, "/data/models").unwrap();
        assert_eq!(tuples(&store), tuples(&reloaded));
        assert_eq!(store.render(), reloaded.render());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = JobStore::load("/nonexistent/jobs", "/data/models").unwrap_err();
        assert!(matches!(err, PostboxError::Config(_)));
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        let mut store = JobStore::new("/tmp/unused-ledger", "/data/models");
        let short = "h1\nh2\n000001|Waiting|\n";
        assert!(matches!(
            store.parse(short),
            Err(PostboxError::MalformedLedger { line: 3, .. })
        ));

        let bad_status = "h1\nh2\n000001|Running||||\n";
        assert!(store.parse(bad_status).is_err());

        let bad_chain = "h1\nh2\n000001|Ready|x7|||\n";
        assert!(store.parse(bad_chain).is_err());

        let duplicate = "h1\nh2\n000001|Waiting||||\n000001|Waiting||||\n";
        assert!(store.parse(duplicate).is_err());

        assert!(store.parse("only one line\n").is_err());
    }

    #[test]
    fn test_allocate_id_returns_smallest_gap() {
        let store = make_store(LEDGER);
        assert_eq!(store.allocate_id().unwrap(), 4);

        let empty = JobStore::new("/tmp/unused-ledger", "/data/models");
        assert_eq!(empty.allocate_id().unwrap(), 1);
    }

    #[test]
    fn test_create_appends_waiting_job() {
        let mut store = make_store(LEDGER);
        let sid = store.create(Some(1), "TEFF=19000", "cooler").unwrap();
        assert_eq!(sid, 4);
        let job = store.job(sid).unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.current_chain, None);
        assert_eq!(job.depends_on, Some(1));
        assert_eq!(store.jobs().last().map(|j| j.sid), Some(4));

        let next = store.create(Some(1), "", "").unwrap();
        assert_eq!(next, 6);
    }

    #[test]
    fn test_allocate_id_fails_when_sid_space_is_full() {
        let mut store = JobStore::new("/tmp/unused-ledger", "/data/models");
        for sid in 1..SID_CEILING {
            store
                .jobs
                .insert(sid, Job::new(sid, None, String::new(), String::new()));
        }
        assert!(matches!(store.allocate_id(), Err(PostboxError::Config(_))));
        assert!(matches!(
            store.create(None, "", ""),
            Err(PostboxError::Config(_))
        ));
        assert_eq!(store.len(), (SID_CEILING - 1) as usize);
    }

    #[test]
    fn test_create_rejects_text_the_ledger_cannot_hold() {
        let mut store = make_store(LEDGER);
        assert!(matches!(
            store.create(Some(1), "B|2", "x"),
            Err(PostboxError::InvalidField { field: "params", .. })
        ));
        assert!(matches!(
            store.create(Some(1), "A=1", "two\nlines"),
            Err(PostboxError::InvalidField { field: "comment", .. })
        ));
        assert!(store.create(Some(1), "A=1\r", "").is_err());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_created_fields_survive_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs");
        let mut store = JobStore::new(&path, "/data/models");
        let first = store.create(None, "A=1", "note ").unwrap();
        let second = store.create(Some(first), " B=2", "left | right").unwrap();
        store.save().unwrap();

        let reloaded = JobStore::load(&path, "/data/models").unwrap();
        assert_eq!(reloaded.job(first).unwrap().comment, "note ");
        assert_eq!(reloaded.job(second).unwrap().params, " B=2");
        assert_eq!(reloaded.job(second).unwrap().comment, "left | right");
        assert_eq!(tuples(&store), tuples(&reloaded));
    }

    #[test]
    fn test_filter_by_status_in_ledger_order() {
        let mut store = make_store(LEDGER);
        store.create(Some(1), "", "").unwrap();
        assert_eq!(store.sids_with_status(JobStatus::Waiting), vec![5, 4]);
        assert!(store.filter_by_status(JobStatus::Ready).is_empty());
    }

    #[test]
    fn test_ready_to_stage() {
        let store = make_store(LEDGER);
        // Depends on Active job 2.
        assert!(!store.ready_to_stage(store.job(5).unwrap()));
        // Depends on Complete job 1.
        assert!(store.ready_to_stage(store.job(3).unwrap()));
        // No predecessor at all.
        assert!(!store.ready_to_stage(store.job(1).unwrap()));
    }

    #[test]
    fn test_dependency_chain() {
        let store = make_store(LEDGER);
        assert_eq!(store.dependency_chain(1).unwrap(), vec![1]);
        assert_eq!(store.dependency_chain(5).unwrap(), vec![5, 2, 1]);
        assert!(matches!(
            store.dependency_chain(99),
            Err(PostboxError::JobNotFound(99))
        ));
    }

    #[test]
    fn test_dependency_chain_guards_against_bad_links() {
        let dangling = make_store("h1\nh2\n000001|Waiting||000042||\n");
        assert!(matches!(
            dangling.dependency_chain(1),
            Err(PostboxError::JobNotFound(42))
        ));

        let cyclic = make_store("h1\nh2\n000001|Waiting||000002||\n000002|Waiting||000001||\n");
        assert!(matches!(
            cyclic.dependency_chain(1),
            Err(PostboxError::Integrity(_))
        ));
    }

    #[test]
    fn test_set_status_tracks_output_path() {
        let mut store = make_store(LEDGER);
        store.set_status(2, JobStatus::Complete).unwrap();
        assert_eq!(
            store.job(2).unwrap().output_path,
            Some(PathBuf::from("/data/models/000002"))
        );
        store.set_status(2, JobStatus::Aborted).unwrap();
        assert_eq!(store.job(2).unwrap().output_path, None);
        assert!(store.set_status(77, JobStatus::Aborted).is_err());
    }
}
