use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::contracts::ContractCatalog;
use crate::layer::{DataAccess, DataLayer};

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read schema extension file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid schema extension TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

/// Where a field definition came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Core,
    Config,
    Agent(String),
}

impl FieldSource {
    /// Matches `"core"`, `"config"`, or an agent id.
    pub fn matches(&self, source: &str) -> bool {
        match self {
            FieldSource::Core => source == "core",
            FieldSource::Config => source == "config",
            FieldSource::Agent(id) => id == source,
        }
    }
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSource::Core => f.write_str("core"),
            FieldSource::Config => f.write_str("config"),
            FieldSource::Agent(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: String,
    pub source: FieldSource,
}

impl FieldDefinition {
    fn core(name: &str, field_type: FieldType, required: bool, default: Option<Value>, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required,
            default,
            description: description.to_string(),
            source: FieldSource::Core,
        }
    }
}

/// Built-in fields. Only Context and Decisions carry any.
fn core_fields(layer: DataLayer) -> Vec<FieldDefinition> {
    use FieldType::*;
    match layer {
        DataLayer::Context => vec![
            FieldDefinition::core("ticker", String, true, None, "Security code"),
            FieldDefinition::core("trade_date", String, true, None, "Analysis date"),
            FieldDefinition::core("market_type", String, false, Some(Value::from("cn")), "Market the security trades on: cn, hk or us"),
            FieldDefinition::core("company_name", String, false, Some(Value::from("")), "Company display name"),
            FieldDefinition::core("currency", String, false, Some(Value::from("CNY")), "Quote currency"),
        ],
        DataLayer::Decisions => vec![
            FieldDefinition::core("investment_debate", Object, false, None, "Bull/bear debate state"),
            FieldDefinition::core("investment_plan", String, false, None, "Research manager plan"),
            FieldDefinition::core("trade_signal", Object, false, None, "Structured trade signal"),
            FieldDefinition::core("risk_assessment", Object, false, None, "Risk debate state"),
            FieldDefinition::core("final_decision", Object, false, None, "Risk-adjusted final decision"),
        ],
        DataLayer::RawData | DataLayer::AnalysisData | DataLayer::Reports => Vec::new(),
    }
}

/// On-disk shape of a schema extension file.
///
/// ```toml
/// [layers.raw_data.fields.price_data]
/// type = "object"
/// description = "Daily OHLCV bars"
/// ```
#[derive(Debug, Deserialize, Default)]
struct ExtensionFile {
    #[serde(default)]
    layers: HashMap<String, LayerExtension>,
}

#[derive(Debug, Deserialize, Default)]
struct LayerExtension {
    #[serde(default)]
    fields: HashMap<String, FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct FieldSpec {
    #[serde(rename = "type", default = "default_field_type")]
    field_type: FieldType,
    #[serde(default)]
    required: bool,
    default: Option<toml::Value>,
    #[serde(default)]
    description: String,
    source: Option<String>,
}

fn default_field_type() -> FieldType {
    FieldType::Any
}

/// Registry of field definitions per layer: core, extension (file), and
/// agent-registered. Core definitions always win on a name clash.
#[derive(Debug, Clone)]
pub struct DataSchema {
    core: HashMap<DataLayer, BTreeMap<String, FieldDefinition>>,
    extension: HashMap<DataLayer, BTreeMap<String, FieldDefinition>>,
    agent: HashMap<DataLayer, BTreeMap<String, FieldDefinition>>,
}

impl Default for DataSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSchema {
    pub fn new() -> Self {
        let core = DataLayer::ALL
            .into_iter()
            .map(|layer| {
                let fields = core_fields(layer)
                    .into_iter()
                    .map(|f| (f.name.clone(), f))
                    .collect();
                (layer, fields)
            })
            .collect();
        Self {
            core,
            extension: HashMap::new(),
            agent: HashMap::new(),
        }
    }

    pub fn is_core_field(&self, layer: DataLayer, name: &str) -> bool {
        self.core.get(&layer).is_some_and(|m| m.contains_key(name))
    }

    /// Core ∪ extension ∪ agent. Precedence on clash: core, then agent, then extension.
    pub fn get_all_fields(&self, layer: DataLayer) -> BTreeMap<String, FieldDefinition> {
        let mut merged = BTreeMap::new();
        for source in [&self.extension, &self.agent, &self.core] {
            if let Some(fields) = source.get(&layer) {
                merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged
    }

    pub fn is_valid_field(&self, layer: DataLayer, name: &str) -> bool {
        [&self.core, &self.agent, &self.extension]
            .iter()
            .any(|m| m.get(&layer).is_some_and(|f| f.contains_key(name)))
    }

    pub fn get_field_names(&self, layer: DataLayer) -> Vec<String> {
        self.get_all_fields(layer).into_keys().collect()
    }

    pub fn get_field_info(&self, layer: DataLayer, name: &str) -> Option<FieldDefinition> {
        self.get_all_fields(layer).remove(name)
    }

    /// Field names per layer whose source is `source` (`"core"`, `"config"`, or an agent id).
    pub fn get_fields_by_source(&self, source: &str) -> BTreeMap<DataLayer, Vec<String>> {
        DataLayer::ALL
            .into_iter()
            .filter_map(|layer| {
                let names: Vec<String> = self
                    .get_all_fields(layer)
                    .into_values()
                    .filter(|f| f.source.matches(source))
                    .map(|f| f.name)
                    .collect();
                (!names.is_empty()).then_some((layer, names))
            })
            .collect()
    }

    /// Register every explicitly-named output field as a field of `agent_id`.
    ///
    /// Core names are skipped. Whole-layer outputs register nothing.
    pub fn register_agent_fields(&mut self, agent_id: &str, outputs: &[DataAccess]) {
        for access in outputs {
            for name in &access.fields {
                if self.is_core_field(access.layer, name) {
                    continue;
                }
                self.agent.entry(access.layer).or_default().insert(
                    name.clone(),
                    FieldDefinition {
                        name: name.clone(),
                        field_type: FieldType::Any,
                        required: false,
                        default: None,
                        description: format!("produced by {agent_id}"),
                        source: FieldSource::Agent(agent_id.to_string()),
                    },
                );
            }
        }
    }

    pub fn register_contracts(&mut self, catalog: &ContractCatalog) {
        for contract in catalog.all() {
            self.register_agent_fields(&contract.agent_id, &contract.outputs);
        }
    }

    pub fn reset_agent_fields(&mut self) {
        self.agent.clear();
    }

    /// Replace extension fields with those declared in a TOML file.
    pub fn load_extensions(&mut self, path: impl AsRef<Path>) -> Result<usize, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.load_extensions_str(&text)
    }

    /// Returns how many extension fields were loaded.
    pub fn load_extensions_str(&mut self, text: &str) -> Result<usize, SchemaError> {
        let file: ExtensionFile = toml::from_str(text)?;
        self.extension.clear();

        let mut loaded = 0;
        for (layer_name, layer_ext) in file.layers {
            let Some(layer) = DataLayer::parse(&layer_name) else {
                continue;
            };
            for (name, spec) in layer_ext.fields {
                if self.is_core_field(layer, &name) {
                    continue;
                }
                let source = match spec.source.as_deref() {
                    None | Some("config") => FieldSource::Config,
                    Some("core") => continue,
                    Some(agent) => FieldSource::Agent(agent.to_string()),
                };
                let default = spec
                    .default
                    .and_then(|v| serde_json::to_value(v).ok());
                self.extension.entry(layer).or_default().insert(
                    name.clone(),
                    FieldDefinition {
                        name,
                        field_type: spec.field_type,
                        required: spec.required,
                        default,
                        description: spec.description,
                        source,
                    },
                );
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}
