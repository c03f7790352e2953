//! Tool System
//!
//! A closed registry of capabilities the model can call mid-conversation:
//! web search and computational lookup. Each tool carries a JSON schema used
//! both for advertising the callable signature to the model and for
//! validating the arguments it sends back.

mod compute;
mod search;

pub use compute::WolframComputeClient;
pub use search::DuckDuckGoSearchClient;

use serde_json::{json, Value};
use tracing::info;

use crate::error::{CoreError, Result};
use crate::types::{ComputeClient, SearchClient, ToolDefinition, ToolDefinitionFunction};

pub const TOOL_WEB_SEARCH: &str = "web_search";
pub const TOOL_COMPUTE: &str = "compute";

/// A registered tool: name, model-facing description, parameter schema.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Maps tool names to executable capabilities. The set is fixed at startup.
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    search: Box<dyn SearchClient>,
    compute: Box<dyn ComputeClient>,
}

impl ToolRegistry {
    pub fn new(search: Box<dyn SearchClient>, compute: Box<dyn ComputeClient>) -> Self {
        let specs = vec![
            ToolSpec {
                name: TOOL_WEB_SEARCH.to_string(),
                description: "Search the web for current information. Returns a short text summary of the top results.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query"
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: TOOL_COMPUTE.to_string(),
                description: "Answer a computational or factual query (math, unit conversion, dates, measurable facts).".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The computational query, e.g. '17*23' or 'distance from Earth to Mars'"
                        }
                    },
                    "required": ["query"]
                }),
            },
        ];
        Self {
            specs,
            search,
            compute,
        }
    }

    /// Schema for a single tool.
    pub fn describe(&self, name: &str) -> Result<&ToolSpec> {
        self.specs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CoreError::UnknownTool(name.to_string()))
    }

    /// All tool schemas in the shape the chat-completions API expects.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs
            .iter()
            .map(|s| ToolDefinition {
                def_type: "function".to_string(),
                function: ToolDefinitionFunction {
                    name: s.name.clone(),
                    description: s.description.clone(),
                    parameters: s.parameters.clone(),
                },
            })
            .collect()
    }

    /// Execute the named tool with caller-supplied arguments. Arguments are
    /// validated against the tool's schema first. Downstream service failures
    /// surface as `ExecutionFailed`, which the dispatch loop records as an
    /// error tool_result rather than failing the turn.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> Result<String> {
        let spec = self.describe(name)?;
        validate_arguments(spec, arguments)?;

        info!(tool = name, "invoking tool");
        match name {
            TOOL_WEB_SEARCH => {
                let query = arguments["query"].as_str().unwrap_or_default();
                self.search
                    .search(query)
                    .await
                    .map_err(|source| CoreError::ExecutionFailed {
                        tool: name.to_string(),
                        source,
                    })
            }
            TOOL_COMPUTE => {
                let query = arguments["query"].as_str().unwrap_or_default();
                self.compute
                    .compute(query)
                    .await
                    .map_err(|source| CoreError::ExecutionFailed {
                        tool: name.to_string(),
                        source,
                    })
            }
            _ => Err(CoreError::UnknownTool(name.to_string())),
        }
    }
}

/// Check `arguments` against the schema subset the registry uses: an object
/// with typed properties and a `required` list.
fn validate_arguments(spec: &ToolSpec, arguments: &Value) -> Result<()> {
    let invalid = |reason: String| CoreError::InvalidArguments {
        tool: spec.name.clone(),
        reason,
    };

    let obj = arguments
        .as_object()
        .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;

    if let Some(required) = spec.parameters["required"].as_array() {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(invalid(format!("missing required argument '{key}'")));
            }
        }
    }

    if let Some(properties) = spec.parameters["properties"].as_object() {
        for (key, value) in obj {
            let Some(prop) = properties.get(key) else {
                return Err(invalid(format!("unexpected argument '{key}'")));
            };
            let expected = prop["type"].as_str().unwrap_or("string");
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !matches {
                return Err(invalid(format!(
                    "argument '{key}' must be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}
