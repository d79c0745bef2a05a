use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use agora_models::layer::{AgentDataContract, DataLayer};
use agora_models::schema::DataSchema;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    InvalidInput,
    CoreConflict,
    MissingDependency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    pub agent_id: String,
    pub error_type: ValidationErrorType,
    pub message: String,
    pub field_name: Option<String>,
    pub layer: Option<DataLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ValidationResult {
    /// Once an error is added the result stays invalid.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

/// Static checks on agent contracts against a schema.
pub struct ContractValidator {
    schema: Arc<DataSchema>,
    registered: BTreeMap<String, AgentDataContract>,
}

impl ContractValidator {
    pub fn new(schema: Arc<DataSchema>) -> Self {
        Self {
            schema,
            registered: BTreeMap::new(),
        }
    }

    /// Make `contract` visible to dependency checks.
    pub fn register_contract(&mut self, contract: &AgentDataContract) {
        self.registered
            .insert(contract.agent_id.clone(), contract.clone());
    }

    pub fn validate_contract(
        &self,
        contract: &AgentDataContract,
        check_dependencies: bool,
        strict_input_check: bool,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        let agent_id = &contract.agent_id;

        for access in &contract.inputs {
            for field in &access.fields {
                if self.schema.is_valid_field(access.layer, field) {
                    continue;
                }
                let message = format!("invalid input field: {}.{}", access.layer, field);
                if strict_input_check {
                    result.add_error(ValidationError {
                        agent_id: agent_id.clone(),
                        error_type: ValidationErrorType::InvalidInput,
                        message,
                        field_name: Some(field.clone()),
                        layer: Some(access.layer),
                    });
                } else {
                    result.add_warning(message);
                }
            }
        }

        // Decisions core fields are the slots decision agents are meant to fill.
        for access in contract
            .outputs
            .iter()
            .filter(|a| a.layer != DataLayer::Decisions)
        {
            for field in &access.fields {
                if self.schema.is_core_field(access.layer, field) {
                    result.add_error(ValidationError {
                        agent_id: agent_id.clone(),
                        error_type: ValidationErrorType::CoreConflict,
                        message: format!("cannot overwrite core field: {}.{}", access.layer, field),
                        field_name: Some(field.clone()),
                        layer: Some(access.layer),
                    });
                }
            }
        }

        if check_dependencies {
            for dep in &contract.depends_on {
                if !self.registered.contains_key(dep) {
                    result.add_error(ValidationError {
                        agent_id: agent_id.clone(),
                        error_type: ValidationErrorType::MissingDependency,
                        message: format!("dependency not registered: {dep}"),
                        field_name: None,
                        layer: None,
                    });
                }
            }
        }

        result
    }

    /// Register every contract first, then validate each one.
    pub fn validate_all_contracts(
        &mut self,
        contracts: &[AgentDataContract],
        check_dependencies: bool,
        strict_input_check: bool,
    ) -> BTreeMap<String, ValidationResult> {
        for contract in contracts {
            self.register_contract(contract);
        }
        contracts
            .iter()
            .map(|c| {
                (
                    c.agent_id.clone(),
                    self.validate_contract(c, check_dependencies, strict_input_check),
                )
            })
            .collect()
    }
}

/// Topological order over `contracts`.
///
/// Edges come from `depends_on` (between the given contracts only) and from
/// fields: a contract producing `(L, F)` runs before one that explicitly reads
/// `(L, F)`. Among ready contracts the input order is kept.
pub fn execution_order(contracts: &[AgentDataContract]) -> Result<Vec<String>, EngineError> {
    let index: HashMap<&str, usize> = contracts
        .iter()
        .enumerate()
        .map(|(i, c)| (c.agent_id.as_str(), i))
        .collect();

    let mut producers: HashMap<(DataLayer, &str), Vec<usize>> = HashMap::new();
    for (i, contract) in contracts.iter().enumerate() {
        for access in &contract.outputs {
            for field in &access.fields {
                producers.entry((access.layer, field.as_str())).or_default().push(i);
            }
        }
    }

    let mut prerequisites: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); contracts.len()];
    for (i, contract) in contracts.iter().enumerate() {
        for dep in &contract.depends_on {
            if let Some(&j) = index.get(dep.as_str()) {
                if j != i {
                    prerequisites[i].insert(j);
                }
            }
        }
        for access in &contract.inputs {
            for field in &access.fields {
                if let Some(sources) = producers.get(&(access.layer, field.as_str())) {
                    prerequisites[i].extend(sources.iter().copied().filter(|&j| j != i));
                }
            }
        }
    }

    let mut done = vec![false; contracts.len()];
    let mut order = Vec::with_capacity(contracts.len());
    while order.len() < contracts.len() {
        let ready = (0..contracts.len())
            .find(|&i| !done[i] && prerequisites[i].iter().all(|&j| done[j]));
        match ready {
            Some(i) => {
                done[i] = true;
                order.push(contracts[i].agent_id.clone());
            }
            None => {
                let stuck = (0..contracts.len())
                    .filter(|&i| !done[i])
                    .map(|i| contracts[i].agent_id.clone())
                    .collect();
                return Err(EngineError::DependencyCycle(stuck));
            }
        }
    }
    Ok(order)
}
