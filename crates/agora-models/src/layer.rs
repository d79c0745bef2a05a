use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The five namespaces of the analysis context, in the order data flows
/// through them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DataLayer {
    Context,
    RawData,
    AnalysisData,
    Reports,
    Decisions,
}

impl DataLayer {
    pub const ALL: [DataLayer; 5] = [
        DataLayer::Context,
        DataLayer::RawData,
        DataLayer::AnalysisData,
        DataLayer::Reports,
        DataLayer::Decisions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataLayer::Context => "context",
            DataLayer::RawData => "raw_data",
            DataLayer::AnalysisData => "analysis_data",
            DataLayer::Reports => "reports",
            DataLayer::Decisions => "decisions",
        }
    }

    pub fn parse(name: &str) -> Option<DataLayer> {
        DataLayer::ALL.into_iter().find(|l| l.as_str() == name)
    }
}

impl fmt::Display for DataLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One read or write permission on a layer.
///
/// An empty `fields` list means the whole layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataAccess {
    pub layer: DataLayer,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl DataAccess {
    pub fn new(layer: DataLayer, fields: &[&str]) -> Self {
        Self {
            layer,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            required: true,
        }
    }

    /// Whole-layer access.
    pub fn layer(layer: DataLayer) -> Self {
        Self::new(layer, &[])
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn is_whole_layer(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether this access covers `field` (or any field when `None`).
    pub fn covers(&self, field: Option<&str>) -> bool {
        match field {
            None => true,
            Some(f) => self.is_whole_layer() || self.fields.iter().any(|x| x == f),
        }
    }
}

/// Raised when a contract is built with an empty agent id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("agent_id must not be empty")]
pub struct EmptyAgentId;

/// What an agent may read, what it may write, and which agents must run first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentDataContract {
    pub agent_id: String,
    #[serde(default)]
    pub inputs: Vec<DataAccess>,
    #[serde(default)]
    pub outputs: Vec<DataAccess>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
}

impl AgentDataContract {
    pub fn new(agent_id: impl Into<String>) -> Result<Self, EmptyAgentId> {
        let agent_id = agent_id.into();
        if agent_id.trim().is_empty() {
            return Err(EmptyAgentId);
        }
        Ok(Self {
            agent_id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: BTreeSet::new(),
            description: String::new(),
        })
    }

    pub fn input(mut self, access: DataAccess) -> Self {
        self.inputs.push(access);
        self
    }

    pub fn output(mut self, access: DataAccess) -> Self {
        self.outputs.push(access);
        self
    }

    pub fn depends_on(mut self, agents: &[&str]) -> Self {
        self.depends_on.extend(agents.iter().map(|a| a.to_string()));
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn input_layers(&self) -> BTreeSet<DataLayer> {
        self.inputs.iter().map(|a| a.layer).collect()
    }

    pub fn output_layers(&self) -> BTreeSet<DataLayer> {
        self.outputs.iter().map(|a| a.layer).collect()
    }

    /// Explicitly named input fields on `layer`. Whole-layer accesses contribute nothing.
    pub fn input_fields(&self, layer: DataLayer) -> Vec<&str> {
        collect_fields(&self.inputs, layer)
    }

    pub fn output_fields(&self, layer: DataLayer) -> Vec<&str> {
        collect_fields(&self.outputs, layer)
    }

    pub fn has_input_access(&self, layer: DataLayer, field: Option<&str>) -> bool {
        self.inputs
            .iter()
            .any(|a| a.layer == layer && a.covers(field))
    }

    pub fn has_output_access(&self, layer: DataLayer, field: Option<&str>) -> bool {
        self.outputs
            .iter()
            .any(|a| a.layer == layer && a.covers(field))
    }

    /// The layer a named output field lands in, if the contract declares it.
    ///
    /// Explicit declarations win over whole-layer grants.
    pub fn output_layer_of(&self, field: &str) -> Option<DataLayer> {
        self.outputs
            .iter()
            .find(|a| a.fields.iter().any(|f| f == field))
            .or_else(|| self.outputs.iter().find(|a| a.is_whole_layer()))
            .map(|a| a.layer)
    }
}

fn collect_fields(accesses: &[DataAccess], layer: DataLayer) -> Vec<&str> {
    let mut fields: Vec<&str> = Vec::new();
    for access in accesses.iter().filter(|a| a.layer == layer) {
        for f in &access.fields {
            if !fields.contains(&f.as_str()) {
                fields.push(f);
            }
        }
    }
    fields
}
