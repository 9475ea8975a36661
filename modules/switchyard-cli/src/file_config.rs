use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use switchyard_engine::{ActionRef, DispatcherBuilder, DispatcherConfig, Input, ValidatorSpec};
use switchyard_store::MemoryStore;

use crate::handlers::{HttpRemote, LocalSpec, RemoteSpec};

/// TOML-backed dispatcher definition loaded from disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// When absent, settings come from `SWITCHYARD_*` env vars.
    pub dispatcher: Option<DispatcherConfig>,
    /// Initial store contents.
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(default)]
    pub events: BTreeMap<String, Vec<ActionSpec>>,
    #[serde(default)]
    pub routes: BTreeMap<String, Vec<ActionSpec>>,
    #[serde(default)]
    pub listeners: BTreeMap<String, Vec<ActionSpec>>,
    #[serde(default)]
    pub sockets: BTreeMap<String, Vec<ActionSpec>>,
    #[serde(default)]
    pub validators: BTreeMap<String, ValidatorSpec>,
    #[serde(default)]
    pub local: BTreeMap<String, LocalSpec>,
    #[serde(default)]
    pub remote: BTreeMap<String, RemoteSpec>,
}

/// One entry of a sequence: an action name, or a store-gated branch.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ActionSpec {
    Name(String),
    Branch(BranchSpec),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchSpec {
    /// Dotted store path gating the branch.
    pub when: String,
    /// Inline actions to run when open.
    #[serde(default)]
    pub then: Vec<ActionSpec>,
    /// Registered sequence to run when open, instead of `then`.
    pub sequence: Option<String>,
}

impl ActionSpec {
    pub fn to_action(&self) -> Result<ActionRef> {
        match self {
            ActionSpec::Name(name) => Ok(ActionRef::name(name.as_str())),
            ActionSpec::Branch(branch) => match &branch.sequence {
                Some(_) if !branch.then.is_empty() => {
                    bail!("branch on `{}` sets both `then` and `sequence`", branch.when)
                }
                Some(key) => Ok(ActionRef::when_sequence(branch.when.as_str(), key.as_str())),
                None => Ok(ActionRef::when(branch.when.as_str(), to_actions(&branch.then)?)),
            },
        }
    }
}

fn to_actions(specs: &[ActionSpec]) -> Result<Vec<ActionRef>> {
    specs.iter().map(ActionSpec::to_action).collect()
}

impl FileConfig {
    /// Dispatcher settings: the `[dispatcher]` table if present, else env.
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig> {
        match &self.dispatcher {
            Some(config) => Ok(config.clone()),
            None => DispatcherConfig::from_env(),
        }
    }

    pub fn initial_store(&self) -> Result<MemoryStore> {
        match &self.state {
            None => Ok(MemoryStore::new()),
            Some(state @ Value::Object(_)) => Ok(MemoryStore::with_state(state.clone())),
            Some(other) => bail!("`state` must be a table, got {other}"),
        }
    }

    /// Register every sequence, validator, and handler on a builder.
    pub fn apply(
        &self,
        mut builder: DispatcherBuilder<MemoryStore>,
    ) -> Result<DispatcherBuilder<MemoryStore>> {
        for (key, specs) in &self.events {
            let actions = to_actions(specs).with_context(|| format!("in event `{key}`"))?;
            builder = builder.event(key.as_str(), actions);
        }
        for (pattern, specs) in &self.routes {
            let actions = to_actions(specs).with_context(|| format!("in route `{pattern}`"))?;
            builder = builder.route(pattern.as_str(), actions);
        }
        for (paths, specs) in &self.listeners {
            let actions = to_actions(specs).with_context(|| format!("in listener `{paths}`"))?;
            builder = builder.listener(paths.as_str(), actions);
        }
        for (message, specs) in &self.sockets {
            let actions = to_actions(specs).with_context(|| format!("in socket `{message}`"))?;
            builder = builder.socket(message.as_str(), actions);
        }

        for (key, spec) in &self.validators {
            builder = builder.validator(key.as_str(), spec.clone());
        }

        for (name, spec) in &self.local {
            let spec = spec.clone();
            builder = builder.local(name.as_str(), move |store: &mut MemoryStore, input: &Input| {
                spec.apply(store, input)
            });
        }
        for (name, spec) in &self.remote {
            let remote = HttpRemote::new(spec.clone())
                .with_context(|| format!("Failed to set up remote action `{name}`"))?;
            builder = builder.with_remote(name.as_str(), Arc::new(remote));
        }

        Ok(builder)
    }
}

/// Parse a TOML dispatcher definition.
pub fn parse_config(content: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(content).context("Failed to parse dispatcher config")?;
    Ok(config)
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}
