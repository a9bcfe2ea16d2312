use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HearthError, Result};
use crate::traits::ToolHandler;

/// Short human-readable summary of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Explanation {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

type ExplainArgsFn = Arc<dyn Fn(&Value) -> Explanation + Send + Sync>;
type ExplainReturnValsFn = Arc<dyn Fn(&Value, &Value) -> Explanation + Send + Sync>;

/// A named, schema-described asynchronous capability.
///
/// `explain_args` and `explain_return_vals` must be pure: no I/O, no state.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub args: Value,
    pub return_vals: Value,
    handler: Arc<dyn ToolHandler>,
    explain_args: Option<ExplainArgsFn>,
    explain_return_vals: Option<ExplainReturnValsFn>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Value::Object(Default::default()),
            return_vals: Value::Null,
            handler: Arc::new(handler),
            explain_args: None,
            explain_return_vals: None,
        }
    }

    pub fn args(mut self, schema: Value) -> Self {
        self.args = schema;
        self
    }

    pub fn return_vals(mut self, schema: Value) -> Self {
        self.return_vals = schema;
        self
    }

    pub fn explain_args(
        mut self,
        f: impl Fn(&Value) -> Explanation + Send + Sync + 'static,
    ) -> Self {
        self.explain_args = Some(Arc::new(f));
        self
    }

    pub fn explain_return_vals(
        mut self,
        f: impl Fn(&Value, &Value) -> Explanation + Send + Sync + 'static,
    ) -> Self {
        self.explain_return_vals = Some(Arc::new(f));
        self
    }

    /// Replace the handler with one built around the current handler.
    pub fn wrap_handler<H>(mut self, wrap: impl FnOnce(Arc<dyn ToolHandler>) -> H) -> Self
    where
        H: ToolHandler + 'static,
    {
        let inner = Arc::clone(&self.handler);
        self.handler = Arc::new(wrap(inner));
        self
    }

    pub async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        self.handler.call(args).await
    }

    pub fn describe_args(&self, args: &Value) -> Option<Explanation> {
        self.explain_args.as_ref().map(|f| f(args))
    }

    pub fn describe_return_vals(&self, args: &Value, result: &Value) -> Option<Explanation> {
        self.explain_return_vals.as_ref().map(|f| f(args, result))
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("args", &self.args)
            .field("return_vals", &self.return_vals)
            .finish_non_exhaustive()
    }
}

/// Process-wide name → tool map shared by every plugin.
///
/// Cloning yields another handle to the same map.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<BTreeMap<String, Arc<Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool. A name that is already taken is rejected and the
    /// existing tool is left untouched.
    pub fn register(&self, tool: Tool) -> Result<()> {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&tool.name) {
            return Err(HearthError::DuplicateTool(tool.name));
        }
        tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Sorted tool names.
    pub fn list(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn explain_args(&self, name: &str, args: &Value) -> Option<Explanation> {
        self.get(name)?.describe_args(args)
    }

    pub fn explain_return_vals(&self, name: &str, args: &Value, result: &Value) -> Option<Explanation> {
        self.get(name)?.describe_return_vals(args, result)
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.list()).finish()
    }
}
