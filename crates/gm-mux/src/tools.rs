//! Tool registry and argument validation
//!
//! Tools are declared with a JSON-schema input shape and grouped under a
//! feature set; the registry only surfaces tools whose set the session
//! acknowledged. Validation covers the subset of JSON schema the tool
//! definitions actually use: object shape, property types, required lists,
//! enums, and defaults.

use gm_core::GmError;
use serde::Serialize;

/// Tool definition exposed through `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    /// Feature set this tool belongs to. Not serialized; used for filtering.
    #[serde(skip)]
    pub feature_set: String,
    /// Channel-owning tools error for clients without the channels extension.
    #[serde(skip)]
    pub opens_channel: bool,
}

/// All declared tools, filtered per session at list/call time.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    /// Build a registry. Tool names must be globally unique; duplicates are
    /// an internal error (a programming mistake, not client input).
    pub fn new(tools: Vec<ToolDef>) -> Result<Self, GmError> {
        for (i, tool) in tools.iter().enumerate() {
            if tools[..i].iter().any(|t| t.name == tool.name) {
                return Err(GmError::Internal(format!(
                    "duplicate tool name: {}",
                    tool.name
                )));
            }
        }
        Ok(Self { tools })
    }

    /// Tools visible to a session, given its acknowledged feature sets.
    pub fn visible<'a>(
        &'a self,
        acked: impl Fn(&str) -> bool + 'a,
    ) -> impl Iterator<Item = &'a ToolDef> {
        self.tools.iter().filter(move |t| acked(&t.feature_set))
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Resolve a tool for a call: unknown names and unacknowledged sets both
    /// surface as validation errors, without leaking suppressed tool names.
    pub fn resolve(
        &self,
        name: &str,
        acked: impl Fn(&str) -> bool,
    ) -> Result<&ToolDef, GmError> {
        match self.get(name) {
            Some(tool) if acked(&tool.feature_set) => Ok(tool),
            _ => Err(GmError::Validation(format!("unknown tool: {}", name))),
        }
    }
}

/// Validate call arguments against a tool's input schema and fill defaults.
///
/// Returns the arguments with schema defaults applied for absent properties.
pub fn validate_args(
    schema: &serde_json::Value,
    args: &serde_json::Value,
) -> Result<serde_json::Value, GmError> {
    let obj = match args {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        _ => {
            return Err(GmError::Validation("arguments must be an object".into()));
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|v| v.as_str()) {
            if !obj.contains_key(name) {
                return Err(GmError::Validation(format!(
                    "missing required argument: {}",
                    name
                )));
            }
        }
    }

    let mut out = obj;
    for (name, prop) in &properties {
        match out.get(name) {
            Some(value) => {
                check_type(name, prop, value)?;
                if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
                    if !allowed.contains(value) {
                        return Err(GmError::Validation(format!(
                            "argument '{}' not one of {:?}",
                            name, allowed
                        )));
                    }
                }
            }
            None => {
                if let Some(default) = prop.get("default") {
                    out.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(serde_json::Value::Object(out))
}

fn check_type(
    name: &str,
    prop: &serde_json::Value,
    value: &serde_json::Value,
) -> Result<(), GmError> {
    let expected = match prop.get("type").and_then(|t| t.as_str()) {
        Some(t) => t,
        None => return Ok(()),
    };
    let ok = match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(GmError::Validation(format!(
            "argument '{}' must be a {}",
            name, expected
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool(name: &str, set: &str) -> ToolDef {
        ToolDef {
            name: name.into(),
            description: "test".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "target": { "type": "string" },
                    "place": { "type": "integer", "default": 0 },
                },
                "required": ["target"]
            }),
            feature_set: set.into(),
            opens_channel: false,
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ToolRegistry::new(vec![
            sample_tool("lobby_say", "lobby"),
            sample_tool("lobby_say", "game"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_visibility_filtered_by_acked_set() {
        let registry = ToolRegistry::new(vec![
            sample_tool("lobby_say", "lobby"),
            sample_tool("channel_list", "game"),
        ])
        .unwrap();

        let names: Vec<&str> = registry
            .visible(|set| set == "lobby")
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["lobby_say"]);

        assert!(registry.resolve("channel_list", |set| set == "lobby").is_err());
        assert!(registry.resolve("channel_list", |_| true).is_ok());
    }

    #[test]
    fn test_validation_fills_defaults() {
        let tool = sample_tool("lobby_say", "lobby");
        let args = validate_args(
            &tool.input_schema,
            &serde_json::json!({"target": "main"}),
        )
        .unwrap();
        assert_eq!(args["place"], 0);
        assert_eq!(args["target"], "main");
    }

    #[test]
    fn test_validation_rejects_missing_required() {
        let tool = sample_tool("lobby_say", "lobby");
        match validate_args(&tool.input_schema, &serde_json::json!({})) {
            Err(GmError::Validation(msg)) => assert!(msg.contains("target")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_wrong_type() {
        let tool = sample_tool("lobby_say", "lobby");
        let result = validate_args(
            &tool.input_schema,
            &serde_json::json!({"target": 42}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_enum_constraint() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "mode": { "type": "string", "enum": ["headless", "windowed"] }
            }
        });
        assert!(validate_args(&schema, &serde_json::json!({"mode": "headless"})).is_ok());
        assert!(validate_args(&schema, &serde_json::json!({"mode": "vr"})).is_err());
    }
}
