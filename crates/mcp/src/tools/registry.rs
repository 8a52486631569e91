// Tool registry: the named callables a host serves

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use toolbridge_core::schema::open_object_schema;
use toolbridge_core::{Arguments, ToolDescriptor};

/// Description published for tools registered without one.
pub const DEFAULT_DESCRIPTION: &str = "No description";

/// Tool executor trait
///
/// Tools receive the raw keyword arguments from `tools/call` and are
/// responsible for destructuring them. Any error they return is reported
/// to the caller as an execution failure.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, arguments: Arguments) -> Result<Value>;
}

/// Adapter turning a synchronous closure into a [`Tool`].
pub struct FnTool<F> {
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(Arguments) -> Result<Value> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(Arguments) -> Result<Value> + Send + Sync + 'static,
{
    async fn call(&self, arguments: Arguments) -> Result<Value> {
        (self.f)(arguments)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("{0:#}")]
    Execution(anyhow::Error),
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Registry of tools, in registration order.
///
/// Populated while the host is being built and read-only once it serves.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with the open object input schema.
    ///
    /// Re-registering a name replaces the earlier entry in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        tool: Arc<dyn Tool>,
        description: impl Into<String>,
    ) {
        self.register_with_schema(name, tool, description, open_object_schema());
    }

    /// Register a tool publishing a concrete input schema.
    pub fn register_with_schema(
        &mut self,
        name: impl Into<String>,
        tool: Arc<dyn Tool>,
        description: impl Into<String>,
        input_schema: Value,
    ) {
        let name = name.into();
        let description = description.into();
        let description = if description.trim().is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            description
        };

        let entry = RegisteredTool {
            descriptor: ToolDescriptor {
                name: name.clone(),
                description,
                input_schema,
            },
            tool,
        };

        match self.index.get(&name) {
            Some(&position) => {
                tracing::debug!(tool = %name, "Replacing previously registered tool");
                self.tools[position] = entry;
            }
            None => {
                tracing::info!(tool = %name, "Tool registered");
                self.index.insert(name, self.tools.len());
                self.tools.push(entry);
            }
        }
    }

    /// Register a synchronous closure as a tool.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, description: impl Into<String>, f: F)
    where
        F: Fn(Arguments) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnTool::new(f)), description);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index
            .get(name)
            .map(|&position| self.tools[position].tool.clone())
    }

    /// Catalog of all tools, in registration order
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool by name.
    ///
    /// The call runs on its own task so a panicking tool is reported as an
    /// execution failure instead of taking the host down.
    pub async fn invoke(&self, name: &str, arguments: Arguments) -> Result<Value, RegistryError> {
        let tool = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        match tokio::spawn(async move { tool.call(arguments).await }).await {
            Ok(result) => result.map_err(RegistryError::Execution),
            Err(join_error) => Err(RegistryError::Execution(anyhow::anyhow!(
                "tool '{}' panicked: {}",
                name,
                join_error
            ))),
        }
    }
}

/// Text form of a tool's return value: strings verbatim, anything else as compact JSON.
pub fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_fn("echo", "Echo the text back", |args| {
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        });
        registry
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_invoke_registered_tool() {
        let registry = echo_registry();
        let result = registry
            .invoke("echo", args(json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result, json!("hi"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = echo_registry();
        let err = registry.invoke("missing", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(ref name) if name == "missing"));
        assert_eq!(err.to_string(), "Unknown tool: missing");
    }

    #[tokio::test]
    async fn test_invoke_failing_tool() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("fail", "", |_| anyhow::bail!("disk on fire"));

        let err = registry.invoke("fail", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Execution(_)));
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[tokio::test]
    async fn test_invoke_panicking_tool() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("explode", "", |_| panic!("kaboom"));

        let err = registry.invoke("explode", Arguments::new()).await.unwrap_err();
        assert!(err.to_string().contains("explode"));
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("zeta", "last letter", |_| Ok(Value::Null));
        registry.register_fn("alpha", "first letter", |_| Ok(Value::Null));
        registry.register_fn("mid", "", |_| Ok(Value::Null));

        assert_eq!(registry.names(), vec!["zeta", "alpha", "mid"]);
        let catalog = registry.list();
        assert_eq!(catalog[2].description, DEFAULT_DESCRIPTION);
        assert_eq!(catalog[0].input_schema, open_object_schema());
    }

    #[tokio::test]
    async fn test_reregistration_overwrites_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("a", "first", |_| Ok(json!(1)));
        registry.register_fn("b", "", |_| Ok(json!(2)));
        registry.register_fn("a", "second", |_| Ok(json!(3)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.list()[0].description, "second");
        assert_eq!(registry.invoke("a", Arguments::new()).await.unwrap(), json!(3));
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(coerce_text(&json!("plain")), "plain");
        assert_eq!(coerce_text(&json!(42)), "42");
        assert_eq!(coerce_text(&json!({"a": [1, 2]})), "{\"a\":[1,2]}");
        assert_eq!(coerce_text(&Value::Null), "null");
    }
}
