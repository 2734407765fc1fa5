//! Interface to the external simulation toolchain.
//!
//! The toolchain owns the live chain pool. Everything here blocks until the
//! external process exits; there is no timeout.

use indexmap::IndexMap;
use regex::Regex;
use std::process::Command;
use std::sync::LazyLock;

use crate::error::{PostboxError, Result};
use crate::models::ChainNumber;
use crate::{log_debug, log_warn};

/// Occupancy per host: `host -> (occupied cores, total cores)`, in report order.
pub type Occupancy = IndexMap<String, (u32, u32)>;

static OCCUPANCY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"HOST = (.+) \(.+ ([0-9]+) active PoWR programs, ([0-9]+) Cores available")
        .expect("occupancy pattern is valid")
});

/// Operations the scheduler needs from the external toolchain.
pub trait Toolchain {
    /// Raw output of the chain status query.
    fn status(&self) -> Result<String>;

    /// Replace the label of `chain` in the live system.
    fn set_label(&mut self, chain: ChainNumber, label: &str) -> Result<()>;

    /// Start the run on `chain` on machine `host`.
    fn submit(&mut self, chain: ChainNumber, host: &str) -> Result<()>;

    /// Raw output of the machine occupancy query.
    fn occupancy(&self) -> Result<String>;
}

/// Toolchain backed by the PoWR `*.com` scripts.
#[derive(Clone, Debug)]
pub struct PowrToolchain {
    /// Prepended verbatim to each script name.
    proc_prefix: String,
    verbosity: u8,
}

impl PowrToolchain {
    pub fn new(proc_prefix: impl Into<String>, verbosity: u8) -> Self {
        Self {
            proc_prefix: proc_prefix.into(),
            verbosity,
        }
    }

    fn run(&self, script: &str, args: &[&str]) -> Result<String> {
        let program = format!("{}{}", self.proc_prefix, script);
        log_debug!(self.verbosity, "[TOOLCHAIN] {} {:?}", program, args);

        let output = Command::new(&program)
            .args(args)
            .output()
            .map_err(|source| PostboxError::Tool {
                command: program.clone(),
                source,
            })?;

        // A failing script is indistinguishable from one that reports nothing.
        if !output.status.success() {
            log_warn!(
                "[TOOLCHAIN] Warning! {} {:?} exited with {}: {}",
                program,
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Toolchain for PowrToolchain {
    fn status(&self) -> Result<String> {
        self.run("status.com", &[])
    }

    fn set_label(&mut self, chain: ChainNumber, label: &str) -> Result<()> {
        let target = format!("wruniq{}", chain);
        self.run("status.com", &["name", &target, label]).map(|_| ())
    }

    fn submit(&mut self, chain: ChainNumber, host: &str) -> Result<()> {
        let run_id = format!("wrstart{}", chain);
        let destination = format!("to-{}", host);
        self.run("submit.com", &[&run_id, &destination]).map(|_| ())
    }

    fn occupancy(&self) -> Result<String> {
        self.run("psx.com", &["all"])
    }
}

/// Parse occupancy query output.
///
/// Only a `HOST` line immediately followed (among HOST/Efficiency lines) by an
/// `Efficiency` line forms a record; unmatched records are dropped.
pub fn parse_occupancy(output: &str) -> Occupancy {
    let relevant: Vec<&str> = output
        .lines()
        .filter(|line| line.contains("HOST") || line.contains("Efficiency"))
        .collect();

    let mut occupancy = Occupancy::default();
    for pair in relevant.windows(2) {
        let (host_line, usage_line) = (pair[0], pair[1]);
        if !(host_line.contains("HOST") && usage_line.contains("Efficiency")) {
            continue;
        }
        let joined = format!("{} {}", host_line, usage_line);
        let Some(caps) = OCCUPANCY_LINE.captures(&joined) else {
            continue;
        };
        let (Ok(occupied), Ok(total)) = (caps[2].parse::<u32>(), caps[3].parse::<u32>()) else {
            continue;
        };
        occupancy.insert(caps[1].trim().to_string(), (occupied, total));
    }
    occupancy
}
