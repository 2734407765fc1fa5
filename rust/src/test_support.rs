//! Test helpers: settings rooted in a temp directory and an in-memory toolchain.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use crate::config::Settings;
use crate::error::Result;
use crate::models::ChainNumber;
use crate::toolchain::Toolchain;

pub(crate) fn make_settings(root: &Path, chain_range: Range<ChainNumber>) -> Settings {
    Settings {
        schedule_file: root.join("schedule"),
        jobs_file: root.join("jobs"),
        powr_proc: "/nonexistent/proc.dir/".to_string(),
        wrdata_path: root.join("wrdata{}").to_string_lossy().into_owned(),
        save_path: root.join("models"),
        powr_out_path: root.join("output"),
        chain_range,
        machine_priority: Vec::new(),
        verbosity: 0,
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct FakeChain {
    pub host: String,
    pub wrstart: String,
    pub wruniq: String,
    pub formal: String,
    pub label: String,
}

/// Keeps chain state in memory and renders it the way the status query does.
#[derive(Debug, Default)]
pub(crate) struct FakeToolchain {
    chains: BTreeMap<ChainNumber, FakeChain>,
    hosts: Vec<(String, u32, u32)>,
    pub submitted: Vec<(ChainNumber, String)>,
    pub label_writes: Vec<(ChainNumber, String)>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chain(&mut self, number: ChainNumber, host: &str, label: &str) {
        self.chains.insert(
            number,
            FakeChain {
                host: host.to_string(),
                label: label.to_string(),
                ..FakeChain::default()
            },
        );
    }

    pub fn remove_chain(&mut self, number: ChainNumber) {
        self.chains.remove(&number);
    }

    pub fn set_phases(&mut self, number: ChainNumber, wrstart: &str, wruniq: &str, formal: &str) {
        if let Some(chain) = self.chains.get_mut(&number) {
            chain.wrstart = wrstart.to_string();
            chain.wruniq = wruniq.to_string();
            chain.formal = formal.to_string();
        }
    }

    /// Change a label behind the scheduler's back.
    pub fn relabel(&mut self, number: ChainNumber, label: &str) {
        if let Some(chain) = self.chains.get_mut(&number) {
            chain.label = label.to_string();
        }
    }

    pub fn label(&self, number: ChainNumber) -> Option<&str> {
        self.chains.get(&number).map(|c| c.label.as_str())
    }

    pub fn add_host(&mut self, name: &str, occupied: u32, total: u32) {
        self.hosts.push((name.to_string(), occupied, total));
    }
}

impl Toolchain for FakeToolchain {
    fn status(&self) -> Result<String> {
        let mut out = String::from("Chain status\n");
        for (number, c) in &self.chains {
            out.push_str(&format!(
                "Ket.{}\t{}\t{}\t{}\t-\t{}\t{}\n",
                number, c.host, c.wrstart, c.wruniq, c.formal, c.label
            ));
        }
        Ok(out)
    }

    fn set_label(&mut self, chain: ChainNumber, label: &str) -> Result<()> {
        self.label_writes.push((chain, label.to_string()));
        self.relabel(chain, label);
        Ok(())
    }

    fn submit(&mut self, chain: ChainNumber, host: &str) -> Result<()> {
        self.submitted.push((chain, host.to_string()));
        Ok(())
    }

    fn occupancy(&self) -> Result<String> {
        let mut out = String::new();
        for (name, occupied, total) in &self.hosts {
            out.push_str(&format!("HOST = {} (test machine)\n", name));
            out.push_str(&format!(
                "  Efficiency 100%, {} active PoWR programs, {} Cores available\n",
                occupied, total
            ));
        }
        Ok(out)
    }
}
