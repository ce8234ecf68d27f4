//! JSON registry manifest.
//!
//! The manifest is the loosely-typed startup input; [`Manifest::into_registry`]
//! validates it and converts every entry into a typed [`Action`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::action::{Action, AgentRole};
use crate::error::Result;
use crate::registry::Registry;
use crate::state::{Facts, WorldState};

/// Top-level manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    /// Facts that hold before any agent runs.
    #[serde(default)]
    pub initial_state: WorldState,

    /// Agent id -> descriptor.
    pub agents: BTreeMap<String, AgentEntry>,
}

/// One agent descriptor as written in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentEntry {
    pub role: AgentRole,

    #[serde(default)]
    pub preconditions: Facts,

    pub effects: Facts,

    #[serde(default = "default_cost", alias = "baseCost")]
    pub cost: f64,

    #[serde(default)]
    pub plan_priority: i64,

    #[serde(default)]
    pub critical: bool,

    #[serde(default)]
    pub fallback: bool,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// URL of the external collaborator implementing this agent.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_cost() -> f64 {
    1.0
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a manifest file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let manifest = Self::from_json(&text)?;
        info!(
            "Loaded manifest {} with {} agents",
            path.display(),
            manifest.agents.len()
        );
        Ok(manifest)
    }

    /// Agent id -> external endpoint, for entries that declare one.
    pub fn endpoints(&self) -> BTreeMap<String, String> {
        self.agents
            .iter()
            .filter_map(|(id, entry)| entry.endpoint.clone().map(|url| (id.clone(), url)))
            .collect()
    }

    /// Convert into typed actions, without validation.
    pub fn actions(&self) -> Vec<Action> {
        self.agents
            .iter()
            .map(|(id, entry)| Action {
                id: id.clone(),
                role: entry.role,
                preconditions: entry.preconditions.clone(),
                effects: entry.effects.clone(),
                base_cost: entry.cost,
                plan_priority: entry.plan_priority,
                critical: entry.critical,
                fallback: entry.fallback,
                timeout_ms: entry.timeout_ms,
                description: entry.description.clone(),
            })
            .collect()
    }

    /// Validate and freeze into a [`Registry`].
    pub fn into_registry(&self) -> Result<Registry> {
        self.actions()
            .into_iter()
            .fold(
                Registry::builder().initial_state(self.initial_state.clone()),
                |builder, action| builder.action(action),
            )
            .build()
    }
}
