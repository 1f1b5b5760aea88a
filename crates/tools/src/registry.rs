//! Tool registry
//!
//! Registration, discovery by category/access, schema validation and
//! timeout-guarded execution with one retry on transient failures.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;

use helmsman_core::ToolDefinition;

use crate::{Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput, ToolSchema};

/// Tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    validators: HashMap<String, JSONSchema>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; its input schema is compiled once here
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_boxed(Arc::new(tool));
    }

    pub fn register_boxed(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        match JSONSchema::compile(&schema.input_schema) {
            Ok(validator) => {
                self.validators.insert(schema.name.clone(), validator);
            }
            Err(e) => {
                tracing::warn!(tool = %schema.name, error = %e, "uncompilable input schema, skipping validation");
            }
        }
        self.tools.insert(schema.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// LLM-facing definitions for all registered tools
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.schema().definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Tools of one category
    pub fn by_category(&self, category: ToolCategory) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| t.schema())
            .filter(|s| s.category == category)
            .collect()
    }

    /// The read-only subset (safe for restricted agent configurations)
    pub fn read_only_subset(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| t.schema())
            .filter(|s| s.access == ToolAccess::Read)
            .collect()
    }

    /// Validate, then execute with the tool's timeout. Transient failures
    /// are retried once; the second failure is surfaced.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Some(validator) = self.validators.get(name) {
            if let Err(errors) = validator.validate(&arguments) {
                let detail = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                return Err(ToolError::InvalidInput(detail));
            }
        }

        let timeout = tool.timeout();
        let mut last_error = None;

        for attempt in 0..2 {
            match tokio::time::timeout(timeout, tool.execute(arguments.clone(), ctx)).await {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e)) if e.is_transient() && attempt == 0 => {
                    tracing::warn!(tool = name, error = %e, "transient tool failure, retrying once");
                    last_error = Some(e);
                }
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    let e = ToolError::Timeout(name.to_string(), timeout.as_secs());
                    if attempt == 0 {
                        tracing::warn!(tool = name, "tool timed out, retrying once");
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ToolError::Execution("retry loop exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct FlakyTool {
        calls: Arc<Mutex<usize>>,
        fail_first: bool,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "flaky".into(),
                description: "fails once".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
                category: ToolCategory::Rag,
                access: ToolAccess::Read,
            }
        }

        async fn execute(
            &self,
            _arguments: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if self.fail_first && *calls == 1 {
                return Err(ToolError::Execution("hiccup".into()));
            }
            Ok(ToolOutput::text("ok"))
        }
    }

    fn registry_with(fail_first: bool) -> (ToolRegistry, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(FlakyTool {
            calls: calls.clone(),
            fail_first,
        });
        (registry, calls)
    }

    #[tokio::test]
    async fn test_schema_validation_rejects_bad_args() {
        let (registry, calls) = registry_with(false);

        let err = registry
            .execute("flaky", json!({"wrong": 1}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let (registry, calls) = registry_with(true);

        let output = registry
            .execute("flaky", json!({"query": "điều 15"}), &ctx())
            .await
            .unwrap();
        assert_eq!(output.content, "ok");
        assert_eq!(*calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (registry, _) = registry_with(false);
        let err = registry.execute("ghost", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_category_and_readonly_filters() {
        let (registry, _) = registry_with(false);
        assert_eq!(registry.by_category(ToolCategory::Rag).len(), 1);
        assert_eq!(registry.by_category(ToolCategory::Memory).len(), 0);
        assert_eq!(registry.read_only_subset().len(), 1);
    }
}
