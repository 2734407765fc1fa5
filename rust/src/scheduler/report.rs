//! Outcomes of scheduler operations, returned to the caller for display.

use crate::models::{ChainNumber, Sid};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueReport {
    /// New jobs, in request order.
    pub created: Vec<Sid>,
    /// Request lines left in the request file, with the reason.
    pub rejected: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageReport {
    pub staged: Vec<(Sid, ChainNumber)>,
    /// Jobs whose staging attempt failed, with the reason.
    pub skipped: Vec<(Sid, String)>,
    /// Stageable jobs left Waiting because no free chain remained.
    pub deferred: Vec<Sid>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmitReport {
    pub submitted: Vec<(Sid, String)>,
    /// Ready jobs left for the next cycle for lack of host capacity.
    pub deferred: Vec<Sid>,
    /// The occupancy query reported no hosts at all.
    pub no_hosts: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetrieveReport {
    pub retrieved: Vec<Sid>,
    /// Converged chains whose job had already moved past Active.
    pub stale: Vec<Sid>,
    pub failed: Vec<(Sid, String)>,
}

impl RetrieveReport {
    /// No job was archived or attempted.
    pub fn is_idle(&self) -> bool {
        self.retrieved.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CleanReport {
    pub aborted: Vec<Sid>,
    /// Bulk clean found candidates but was not confirmed.
    pub declined: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConsistencyReport {
    /// Ready jobs without a chain, put back to Waiting.
    pub demoted: Vec<Sid>,
    /// Ready jobs already running on their chain, moved to Active.
    pub promoted: Vec<Sid>,
    /// Job/chain cross-match failures. Non-empty blocks mutating operations.
    pub violations: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Result of one `auto` cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AutoReport {
    pub retrieve: RetrieveReport,
    pub queue: QueueReport,
    pub stage: StageReport,
    pub submit: SubmitReport,
}

/// Counts for the startup dashboard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub jobs_total: usize,
    pub waiting: usize,
    /// Waiting jobs whose predecessor is Complete.
    pub stageable: usize,
    pub ready: usize,
    pub active: usize,
    pub complete: usize,
    pub aborted: usize,
    pub chains_total: usize,
    pub chains_active: usize,
    pub chains_converged: usize,
    pub chains_crashed: usize,
    pub chains_free: usize,
}
