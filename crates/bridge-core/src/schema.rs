//! Map tool input schemas onto typed function signatures.
//!
//! Only flat JSON Schema shapes are supported: scalars, string enums and
//! arrays of those. Nested objects are rejected with a schema error naming
//! the offending field.

use crate::error::{BridgeError, Result};
use crate::protocol::Tool;
use serde::Serialize;
use serde_json::{Map, Value};

/// Argument or return type of a generated function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDef {
    String,
    Integer,
    Float,
    Boolean,
    /// Closed set of string values; `name` is the generated type name.
    Enum { name: String, values: Vec<String> },
    List { item: Box<TypeDef> },
}

/// One function argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionArg {
    pub name: String,
    #[serde(rename = "type")]
    pub type_def: TypeDef,
    pub optional: bool,
}

/// A typed signature generated from a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    /// Tools return free-form text.
    pub returns: TypeDef,
    /// Ordered by argument name.
    pub args: Vec<FunctionArg>,
}

/// Outcome of mapping a whole catalogue.
#[derive(Debug, Default)]
pub struct MappedTools {
    pub functions: Vec<FunctionDef>,
    /// Tool name and the reason it could not be mapped.
    pub failures: Vec<(String, BridgeError)>,
}

/// Map a single tool.
pub fn map_tool(tool: &Tool) -> Result<FunctionDef> {
    let required = tool.required_fields();
    let mut args = Vec::new();

    if let Some(properties) = tool.input_schema.get("properties").and_then(Value::as_object) {
        // serde_json maps iterate in key order.
        for (field, prop) in properties {
            let Some(prop) = prop.as_object() else {
                continue;
            };
            args.push(FunctionArg {
                name: field.clone(),
                type_def: map_type(field, prop)?,
                optional: !required.contains(field),
            });
        }
    }

    Ok(FunctionDef {
        name: tool.name.clone(),
        description: tool.description.clone(),
        returns: TypeDef::String,
        args,
    })
}

/// Map every tool, collecting failures instead of stopping at the first.
pub fn map_tools(tools: &[Tool]) -> MappedTools {
    let mut mapped = MappedTools::default();
    for tool in tools {
        match map_tool(tool) {
            Ok(function) => mapped.functions.push(function),
            Err(e) => mapped.failures.push((tool.name.clone(), e)),
        }
    }
    mapped
}

/// Map one property schema. `field` names generated enum types and errors.
pub fn map_type(field: &str, schema: &Map<String, Value>) -> Result<TypeDef> {
    let type_name = schema.get("type").and_then(Value::as_str).unwrap_or("");

    match type_name {
        "string" => match schema.get("enum").and_then(Value::as_array) {
            Some(values) => Ok(TypeDef::Enum {
                name: title_case(field),
                values: values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            }),
            None => Ok(TypeDef::String),
        },
        "integer" => Ok(TypeDef::Integer),
        "number" => Ok(TypeDef::Float),
        "boolean" => Ok(TypeDef::Boolean),
        "array" => {
            let items = schema
                .get("items")
                .and_then(Value::as_object)
                .ok_or_else(|| BridgeError::MissingItems {
                    field: field.to_string(),
                })?;
            let item = map_type(&format!("{}Item", field), items)?;
            Ok(TypeDef::List {
                item: Box::new(item),
            })
        }
        other => Err(BridgeError::Schema {
            field: field.to_string(),
            type_name: other.to_string(),
        }),
    }
}

/// Upper-case the first letter of every word. Letters, digits and `_` are
/// word characters.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_');
    }
    out
}
