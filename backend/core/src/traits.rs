use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;

/// The executable part of a tool.
///
/// Implemented for any `Fn(Value) -> Future<Output = anyhow::Result<Value>>`,
/// so plain async closures can be declared as tools.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value>> + Send,
{
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value> {
        (self)(args).await
    }
}
