//! Tool call resolution with compiled JSON-Schema validation.

use std::collections::BTreeMap;

use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

use valet_domain::WriteActionType;
use valet_store::ConnectorScope;

use crate::catalog::{catalog, ToolSpec};

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("tool {name:?} is not in the catalog")]
    NotAllowed { name: String },
    #[error("arguments for {name:?} failed validation: {}", fields.join(", "))]
    SchemaInvalid { name: String, fields: Vec<String> },
}

/// A validated tool call, ready to execute or to gate behind approval.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub is_write: bool,
    pub action_type: Option<WriteActionType>,
    pub connector_scope: Option<ConnectorScope>,
}

pub struct ToolRegistry {
    entries: BTreeMap<&'static str, (ToolSpec, Validator)>,
}

impl ToolRegistry {
    /// Compiles a validator per catalog entry. The catalog is static, so a
    /// compilation failure is a programming error surfaced at startup.
    pub fn new() -> anyhow::Result<Self> {
        let mut entries = BTreeMap::new();
        for spec in catalog() {
            let validator = jsonschema::validator_for(&spec.parameters)
                .map_err(|error| anyhow::anyhow!("schema for {} is invalid: {error}", spec.name))?;
            entries.insert(spec.name, (spec, validator));
        }
        Ok(Self { entries })
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.entries.get(name).map(|(spec, _)| spec)
    }

    pub fn resolve(
        &self,
        call_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<ResolvedCall, ToolCallError> {
        let Some((spec, validator)) = self.entries.get(name) else {
            return Err(ToolCallError::NotAllowed {
                name: name.to_string(),
            });
        };

        let fields: Vec<String> = validator
            .iter_errors(&arguments)
            .map(|error| {
                let pointer = error.instance_path().to_string();
                if pointer.is_empty() {
                    error.to_string()
                } else {
                    format!("{pointer}: {error}")
                }
            })
            .collect();
        if !fields.is_empty() {
            return Err(ToolCallError::SchemaInvalid {
                name: name.to_string(),
                fields,
            });
        }

        Ok(ResolvedCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments,
            is_write: spec.is_write,
            action_type: spec.action_type,
            connector_scope: spec.connector_scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_a_valid_write_call() {
        let registry = ToolRegistry::new().expect("registry");
        let call = registry
            .resolve(
                "call-1",
                "send_email",
                json!({"to": "a@example.com", "subject": "hi", "body": "hello"}),
            )
            .expect("resolve");
        assert!(call.is_write);
        assert_eq!(call.action_type, Some(WriteActionType::SendEmail));
        assert_eq!(call.connector_scope, Some(ConnectorScope::Email));
    }

    #[test]
    fn unknown_tool_is_not_allowed() {
        let registry = ToolRegistry::new().expect("registry");
        let error = registry
            .resolve("call-1", "delete_everything", json!({}))
            .expect_err("must fail");
        assert!(matches!(error, ToolCallError::NotAllowed { .. }));
    }

    #[test]
    fn schema_failures_list_offending_fields() {
        let registry = ToolRegistry::new().expect("registry");
        let error = registry
            .resolve(
                "call-1",
                "send_email",
                json!({"to": "a@example.com", "subject": 7}),
            )
            .expect_err("must fail");
        let ToolCallError::SchemaInvalid { name, fields } = error else {
            panic!("expected SchemaInvalid");
        };
        assert_eq!(name, "send_email");
        assert!(!fields.is_empty());
    }

    #[test]
    fn extra_properties_are_rejected() {
        let registry = ToolRegistry::new().expect("registry");
        let error = registry
            .resolve(
                "call-1",
                "list_events",
                json!({"max_results": 5, "surprise": true}),
            )
            .expect_err("must fail");
        assert!(matches!(error, ToolCallError::SchemaInvalid { .. }));
    }
}
