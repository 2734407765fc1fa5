//! Snapshot of the live chain pool as reported by the status query.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::config::Settings;
use crate::error::{PostboxError, Result};
use crate::models::{sid_tag, Chain, ChainNumber, Sid};
use crate::toolchain::Toolchain;

/// Prefix of status lines that describe a chain, followed by its number.
pub const SLOT_PREFIX: &str = "Ket.";

/// Tab-separated fields: slot, host, wrstart, wruniq, (unused), formal, label.
const STATUS_FIELDS: usize = 7;

/// Chains within the usable range, keyed by number.
///
/// Never merged: every `refresh` replaces the whole map.
#[derive(Clone, Debug)]
pub struct ChainRegistry {
    settings: Settings,
    chains: BTreeMap<ChainNumber, Chain>,
}

impl ChainRegistry {
    /// Create an empty registry. Call `refresh` before use.
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.clone(),
            chains: BTreeMap::new(),
        }
    }

    /// Re-read the chain pool from the toolchain, discarding the old snapshot.
    pub fn refresh<T: Toolchain + ?Sized>(&mut self, toolchain: &T) -> Result<()> {
        let output = toolchain.status()?;
        self.chains = parse_status(&output, &self.settings)?;
        Ok(())
    }

    pub fn get(&self, number: ChainNumber) -> Option<&Chain> {
        self.chains.get(&number)
    }

    /// All chains in number order.
    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn usable_range(&self) -> Range<ChainNumber> {
        self.settings.chain_range.clone()
    }

    pub fn free(&self) -> Vec<&Chain> {
        self.chains.values().filter(|c| c.is_free()).collect()
    }

    pub fn active(&self) -> Vec<&Chain> {
        self.chains.values().filter(|c| c.is_active()).collect()
    }

    pub fn crashed(&self) -> Vec<&Chain> {
        self.chains.values().filter(|c| c.is_crashed()).collect()
    }

    pub fn converged(&self) -> Vec<&Chain> {
        self.chains.values().filter(|c| c.is_converged()).collect()
    }

    /// Tag `number` with `sid` (or clear its tag) and push the label live.
    ///
    /// The external write happens first; the snapshot only changes once the
    /// toolchain accepted the call.
    pub fn set_label<T: Toolchain + ?Sized>(
        &mut self,
        toolchain: &mut T,
        number: ChainNumber,
        sid: Option<Sid>,
    ) -> Result<()> {
        if !self.chains.contains_key(&number) {
            return Err(PostboxError::ChainNotFound(number));
        }
        let label = sid.map(sid_tag).unwrap_or_default();
        toolchain.set_label(number, &label)?;
        if let Some(chain) = self.chains.get_mut(&number) {
            chain.label = label;
        }
        Ok(())
    }
}

/// Parse status query output into chains within the usable range.
pub fn parse_status(output: &str, settings: &Settings) -> Result<BTreeMap<ChainNumber, Chain>> {
    let mut chains = BTreeMap::new();
    for line in output.lines() {
        let Some(rest) = line.strip_prefix(SLOT_PREFIX) else {
            continue;
        };
        let malformed = |reason: &str| PostboxError::MalformedStatus {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = rest.split('\t').collect();
        let number: ChainNumber = fields[0]
            .trim()
            .parse()
            .map_err(|_| malformed("invalid chain number"))?;
        if !settings.chain_range.contains(&number) {
            continue;
        }
        if fields.len() < STATUS_FIELDS {
            return Err(malformed("too few tab-separated fields"));
        }

        chains.insert(
            number,
            Chain {
                number,
                host: fields[1].trim().to_string(),
                wrstart: fields[2].to_string(),
                wruniq: fields[3].to_string(),
                formal: fields[5].to_string(),
                path: settings.chain_path(number),
                label: fields[6].trim().to_string(),
            },
        );
    }
    Ok(chains)
}
