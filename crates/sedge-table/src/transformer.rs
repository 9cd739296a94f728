//! The transformer facade.
//!
//! Wraps a parsed rule set and, once built, its compiled table. Before
//! the table exists transforms go through the walker; after `build_table`
//! they run on the machine. A transformer can also be restored from a
//! saved table, in which case no rule set is present and the table is the
//! only execution path.

use crate::build::{build, BuildError};
use crate::run;
use crate::state::{Machine, MachineStats, StateKind};
use crate::text::{self, FormatError};
use sedge_rules::{parse_rules, ParseResult, RuleSet, Walker};
use sedge_types::{CancelToken, Params, TransformMode, TransformResult};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use tracing::info;

pub struct Transformer {
    rules: Option<RuleSet>,
    machine: Option<Machine>,
    params: Params,
}

impl Transformer {
    /// Parse rule source; transforms run on the walker until a table is
    /// built.
    pub fn from_rules(source: &str, params: Params) -> ParseResult<Transformer> {
        let rules = parse_rules(source)?;
        Ok(Transformer {
            rules: Some(rules),
            machine: None,
            params,
        })
    }

    /// Restore a transformer from a saved table.
    pub fn from_saved(text: &str) -> Result<Transformer, FormatError> {
        let machine = text::load(text)?;
        let params = machine.params;
        Ok(Transformer {
            rules: None,
            machine: Some(machine),
            params,
        })
    }

    /// Compile the rule set into a table; idempotent.
    pub fn build_table(&mut self) -> Result<&Machine, BuildError> {
        if self.machine.is_none() {
            let rules = self
                .rules
                .as_ref()
                .expect("a transformer without a machine always has rules");
            let machine = build(rules, self.params)?;
            info!(stats = ?machine.stats(), "table compiled");
            self.machine = Some(machine);
        }
        Ok(self.machine.as_ref().unwrap())
    }

    pub fn machine(&self) -> Option<&Machine> {
        self.machine.as_ref()
    }

    /// Transform input, preferring the table when one exists.
    pub fn transform(
        &self,
        input: &str,
        mode: TransformMode,
        cancel: &CancelToken,
    ) -> TransformResult<String> {
        match &self.machine {
            Some(machine) => run::run(machine, input, mode, cancel),
            None => {
                let rules = self
                    .rules
                    .as_ref()
                    .expect("a transformer without a machine always has rules");
                Walker::new(rules).transform(input, mode, self.params, cancel)
            }
        }
    }

    /// The table in its textual save form, if one has been built.
    pub fn save_table(&self) -> Option<String> {
        self.machine.as_ref().map(text::save)
    }

    pub fn stats(&self) -> Option<MachineStats> {
        self.machine.as_ref().map(Machine::stats)
    }

    /// Stats as a JSON object, for build logs and dashboards.
    pub fn stats_json(&self) -> Option<String> {
        self.stats()
            .and_then(|stats| serde_json::to_string(&stats).ok())
    }

    /// SHA-256 over the save form; stable across save/load cycles.
    pub fn fingerprint(&self) -> Option<String> {
        self.machine.as_ref().map(fingerprint)
    }
}

/// SHA-256 hex digest of a machine's save form.
pub fn fingerprint(machine: &Machine) -> String {
    let digest = Sha256::digest(text::save(machine).as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Human-readable dump of a machine, one state per paragraph.
pub fn visualize(machine: &Machine) -> String {
    let mut out = String::new();
    for (idx, state) in machine.states.iter().enumerate() {
        match state.kind {
            StateKind::Accept => {
                let _ = writeln!(out, "state {idx}: accept");
            }
            StateKind::Dead { rollback } => {
                let _ = writeln!(out, "state {idx}: dead, rollback {rollback}");
            }
            StateKind::Scan => {
                let _ = writeln!(out, "state {idx}:");
                for link in &state.links {
                    let actions: Vec<String> = link
                        .actions
                        .iter()
                        .map(|a| text::action_text(machine, a))
                        .collect();
                    let _ = writeln!(
                        out,
                        "  {} -> {} [{}]",
                        link.set,
                        link.target,
                        actions.join("; ")
                    );
                }
            }
        }
    }
    out
}
