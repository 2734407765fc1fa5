//! Core data types for jobs and chains.

use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

/// Job identifier.
pub type Sid = u32;

/// Compute slot identifier, assigned by the external toolchain.
pub type ChainNumber = u32;

/// Exclusive upper bound of the SID space.
pub const SID_CEILING: Sid = 900_000;

/// Marker in a stage status meaning the phase is currently running.
pub const ACTIVE_MARKER: &str = "ACTIVE";
/// Marker in a stage status meaning the phase aborted.
pub const ABORT_MARKER: &str = "AB";
/// Sentinels reported by the three phases once a run has converged.
pub const WRSTART_DONE: &str = "done";
pub const WRUNIQ_CONVERGED: &str = "Conv";
pub const FORMAL_DONE: &str = "done";

static SID_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[SID ([0-9]{6})\]").expect("SID tag pattern is valid"));

/// Render the label tag that marks a chain as holding `sid`.
pub fn sid_tag(sid: Sid) -> String {
    format!("[SID {:06}]", sid)
}

/// Extract the job id encoded in a chain label, if any.
pub fn parse_sid_tag(label: &str) -> Option<Sid> {
    SID_TAG
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Waiting,
    Ready,
    Active,
    Complete,
    Aborted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Waiting,
        JobStatus::Ready,
        JobStatus::Active,
        JobStatus::Complete,
        JobStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "Waiting",
            JobStatus::Ready => "Ready",
            JobStatus::Active => "Active",
            JobStatus::Complete => "Complete",
            JobStatus::Aborted => "Aborted",
        }
    }

    /// Whether a job in this state must be bound to a chain.
    pub fn holds_chain(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Active)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status {:?}", s))
    }
}

/// One unit of simulation work.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub sid: Sid,
    pub status: JobStatus,
    /// Bound chain, set only while Ready or Active.
    pub current_chain: Option<ChainNumber>,
    /// Predecessor whose output this job starts from.
    pub depends_on: Option<Sid>,
    /// Comma-separated `KEY=VALUE` overrides for the CARDS file.
    pub params: String,
    pub comment: String,
    /// Archive location, present exactly when the job is Complete.
    pub output_path: Option<PathBuf>,
}

impl Job {
    pub fn new(sid: Sid, depends_on: Option<Sid>, params: String, comment: String) -> Self {
        Self {
            sid,
            status: JobStatus::Waiting,
            current_chain: None,
            depends_on,
            params,
            comment,
            output_path: None,
        }
    }
}

/// A compute slot as last reported by the external status query.
#[derive(Clone, Debug, PartialEq)]
pub struct Chain {
    pub number: ChainNumber,
    pub host: String,
    pub wrstart: String,
    pub wruniq: String,
    pub formal: String,
    /// Working directory of the chain.
    pub path: PathBuf,
    /// Free-text annotation; carries the `[SID nnnnnn]` assignment tag.
    pub label: String,
}

impl Chain {
    /// Job bound to this chain, derived from the label on every call.
    pub fn assigned_job(&self) -> Option<Sid> {
        parse_sid_tag(&self.label)
    }

    pub fn is_free(&self) -> bool {
        self.assigned_job().is_none()
    }

    pub fn is_active(&self) -> bool {
        self.assigned_job().is_some() && self.any_phase_contains(ACTIVE_MARKER)
    }

    pub fn is_crashed(&self) -> bool {
        self.assigned_job().is_some() && self.any_phase_contains(ABORT_MARKER)
    }

    pub fn is_converged(&self) -> bool {
        self.assigned_job().is_some()
            && self.wrstart.trim() == WRSTART_DONE
            && self.wruniq.trim() == WRUNIQ_CONVERGED
            && self.formal.trim() == FORMAL_DONE
    }

    fn any_phase_contains(&self, marker: &str) -> bool {
        [&self.wrstart, &self.wruniq, &self.formal]
            .iter()
            .any(|phase| phase.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chain(label: &str, wrstart: &str, wruniq: &str, formal: &str) -> Chain {
        Chain {
            number: 3,
            host: "node1".to_string(),
            wrstart: wrstart.to_string(),
            wruniq: wruniq.to_string(),
            formal: formal.to_string(),
            path: PathBuf::from("/tmp/wrdata3"),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_sid_tag_round_trip() {
        assert_eq!(sid_tag(43), "[SID 000043]");
        assert_eq!(parse_sid_tag("grid A [SID 000043] rerun"), Some(43));
    }

    #[test]
    fn test_sid_tag_requires_six_digits() {
        assert_eq!(parse_sid_tag("[SID 43]"), None);
        assert_eq!(parse_sid_tag("no tag here"), None);
        assert_eq!(parse_sid_tag(""), None);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Complete".parse::<JobStatus>(), Ok(JobStatus::Complete));
        assert!("complete".parse::<JobStatus>().is_err());
        assert!(JobStatus::Ready.holds_chain());
        assert!(!JobStatus::Waiting.holds_chain());
    }

    #[test]
    fn test_free_chain_has_no_other_classification() {
        let chain = make_chain("", "ACTIVE", "AB", "done");
        assert!(chain.is_free());
        assert!(!chain.is_active());
        assert!(!chain.is_crashed());
        assert!(!chain.is_converged());
    }

    #[test]
    fn test_active_and_crashed_markers() {
        let active = make_chain("[SID 000001]", "done", "ACTIVE", "");
        assert!(active.is_active());
        assert!(!active.is_crashed());

        let crashed = make_chain("[SID 000001]", "done", "AB 12", "");
        assert!(crashed.is_crashed());
        assert!(!crashed.is_active());
    }

    #[test]
    fn test_converged_requires_all_sentinels() {
        assert!(make_chain("[SID 000001]", " done ", "Conv", "done").is_converged());
        assert!(!make_chain("[SID 000001]", "done", "Conv", "ACTIVE").is_converged());
        assert!(!make_chain("[SID 000001]", "done", "Conv 3", "done").is_converged());
    }

    #[test]
    fn test_contradictory_markers_are_not_resolved() {
        let chain = make_chain("[SID 000007]", "ACTIVE", "AB", "");
        assert!(chain.is_active());
        assert!(chain.is_crashed());
    }
}
