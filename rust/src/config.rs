//! Configuration for the scheduler, loaded once at startup.
//!
//! The config file is a flat `key: value` document:
//!
//! ```text
//! # postbox settings
//! schedule_file: /home/user/postbox/schedule
//! jobs_file: /home/user/postbox/jobs
//! powr_proc: /home/user/powr/proc.dir/
//! wrdata_path: /home/user/powr/wrdata{}/
//! save_path: /home/user/postbox/models/
//! powr_out_path: /home/user/powr/output/
//! chain_range: 1-20
//! machine_priority: node3, node1
//! ```

use serde::Deserialize;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{PostboxError, Result};
use crate::logging::VERBOSITY_CHANGES;
use crate::models::{ChainNumber, Sid};

/// Placeholder in `wrdata_path` replaced by the chain number.
const CHAIN_PLACEHOLDER: &str = "{}";

/// Scheduler settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Request file consumed by Queue
    pub schedule_file: PathBuf,
    /// Job ledger
    pub jobs_file: PathBuf,
    /// Prefix prepended to the toolchain executable names
    pub powr_proc: String,
    /// Per-chain working directory template
    pub wrdata_path: String,
    /// Root of the per-job archive directories
    pub save_path: PathBuf,
    /// Directory holding the toolchain's per-chain output logs
    pub powr_out_path: PathBuf,
    /// Usable chain numbers (half-open)
    pub chain_range: Range<ChainNumber>,
    /// Hosts to fill first at submission time, in preference order
    pub machine_priority: Vec<String>,
    /// Logging verbosity (see `logging`)
    pub verbosity: u8,
}

#[derive(Deserialize)]
struct RawSettings {
    schedule_file: PathBuf,
    jobs_file: PathBuf,
    powr_proc: String,
    wrdata_path: String,
    save_path: PathBuf,
    powr_out_path: PathBuf,
    chain_range: String,
    #[serde(default)]
    machine_priority: Option<HostList>,
    #[serde(default)]
    verbosity: Option<u8>,
}

/// Either `a, b, c` or a YAML sequence.
#[derive(Deserialize)]
#[serde(untagged)]
enum HostList {
    Csv(String),
    List(Vec<String>),
}

impl HostList {
    fn into_hosts(self) -> Vec<String> {
        let hosts: Vec<String> = match self {
            HostList::Csv(s) => s.split(',').map(|h| h.trim().to_string()).collect(),
            HostList::List(v) => v.into_iter().map(|h| h.trim().to_string()).collect(),
        };
        hosts.into_iter().filter(|h| !h.is_empty()).collect()
    }
}

impl Settings {
    /// Read and parse the config file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            PostboxError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Parse settings from config file contents.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawSettings = serde_yaml::from_str(text)
            .map_err(|e| PostboxError::Config(format!("invalid config: {}", e)))?;

        Ok(Self {
            schedule_file: raw.schedule_file,
            jobs_file: raw.jobs_file,
            powr_proc: raw.powr_proc,
            wrdata_path: raw.wrdata_path,
            save_path: raw.save_path,
            powr_out_path: raw.powr_out_path,
            chain_range: parse_chain_range(&raw.chain_range)?,
            machine_priority: raw
                .machine_priority
                .map(HostList::into_hosts)
                .unwrap_or_default(),
            verbosity: raw.verbosity.unwrap_or(VERBOSITY_CHANGES),
        })
    }

    /// Working directory of chain `number`.
    pub fn chain_path(&self, number: ChainNumber) -> PathBuf {
        if self.wrdata_path.contains(CHAIN_PLACEHOLDER) {
            PathBuf::from(
                self.wrdata_path
                    .replace(CHAIN_PLACEHOLDER, &number.to_string()),
            )
        } else {
            PathBuf::from(format!("{}{}", self.wrdata_path, number))
        }
    }

    /// Archive directory of job `sid`.
    pub fn archive_path(&self, sid: Sid) -> PathBuf {
        self.save_path.join(format!("{:06}", sid))
    }
}

/// Parse an inclusive `"first-last"` range into `first..last + 1`.
pub fn parse_chain_range(s: &str) -> Result<Range<ChainNumber>> {
    let bad = || PostboxError::Config(format!("invalid chain_range {:?}, expected \"a-b\"", s));
    let (first, last) = s.split_once('-').ok_or_else(bad)?;
    let first: ChainNumber = first.trim().parse().map_err(|_| bad())?;
    let last: ChainNumber = last.trim().parse().map_err(|_| bad())?;
    if last < first {
        return Err(bad());
    }
    Ok(first..last + 1)
}
