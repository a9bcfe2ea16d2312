//! Tool invocation protocol.
//!
//! A `core/tool-call` event `{id, name, args}` is answered by exactly one
//! `core/tool-result` event carrying the same `id`. Unknown tools and
//! failing tools are answered with an error payload rather than an error
//! on the bus, so a bad call can never stall a lifecycle barrier.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hearth_bus::HandlerMode;
use hearth_core::{
    tool_call_event, tool_result_event, FailureKind, HearthError, Result, ToolCall, ToolOutcome,
    ToolRegistry, ToolResult,
};

use crate::runtime::Runtime;

/// Install the `core/tool-call` handler. The handler itself only looks the
/// tool up; execution happens on a separate task so calls overlap.
pub(crate) fn install(runtime: &Runtime) {
    let tools = runtime.tools.clone();
    let log = runtime.log.clone();
    runtime.dispatcher.handle(
        &[tool_call_event().id().clone()],
        HandlerMode::Sequential,
        move |event| {
            let tools = tools.clone();
            let log = log.clone();
            async move {
                let call = match tool_call_event().decode(&event) {
                    Some(Ok(call)) => call,
                    Some(Err(e)) => {
                        warn!(seq = event.seq, error = %e, "Malformed tool call");
                        let reply = malformed(&event.data, &e.to_string());
                        if reply.is_none() {
                            error!(seq = event.seq, "Dropping tool call without an id");
                        }
                        return Ok(reply);
                    }
                    None => return Ok(None),
                };
                if !tools.contains(&call.name) {
                    warn!(id = %call.id, tool = %call.name, "Tool not found");
                    let message = HearthError::ToolNotFound(call.name.clone()).to_string();
                    return Ok(Some(
                        tool_result_event().with(call.failed(FailureKind::NotFound, message))?,
                    ));
                }
                tokio::spawn(async move {
                    let result = execute(&tools, call).await;
                    if let Err(e) = tool_result_event().with(result).and_then(|ev| log.publish(ev)) {
                        warn!(error = %e, "Could not publish tool result");
                    }
                });
                Ok(None)
            }
            .boxed()
        },
    );
}

/// Reply to a call whose payload did not decode, if it at least has an id.
/// A non-string id is echoed in its JSON text form.
fn malformed(data: &Value, reason: &str) -> Option<hearth_core::Event> {
    let id = match data.get("id")? {
        Value::Null => return None,
        Value::String(id) => id.clone(),
        other => other.to_string(),
    };
    let name = data
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let call = ToolCall::new(id, name, data.get("args").cloned().unwrap_or(Value::Null));
    tool_result_event()
        .with(call.failed(FailureKind::Failed, format!("malformed tool call: {reason}")))
        .ok()
}

/// Run one call to completion, turning every failure into a result payload.
pub(crate) async fn execute(tools: &ToolRegistry, call: ToolCall) -> ToolResult {
    let Some(tool) = tools.get(&call.name) else {
        let message = HearthError::ToolNotFound(call.name.clone()).to_string();
        return call.failed(FailureKind::NotFound, message);
    };
    if let Some(explained) = tool.describe_args(&call.args) {
        info!(id = %call.id, tool = %call.name, summary = %explained.summary, "Calling tool");
    } else {
        debug!(id = %call.id, tool = %call.name, "Calling tool");
    }

    let args = call.args.clone();
    let task_tool = Arc::clone(&tool);
    match tokio::spawn(async move { task_tool.invoke(args).await }).await {
        Ok(Ok(value)) => {
            if let Some(explained) = tool.describe_return_vals(&call.args, &value) {
                info!(id = %call.id, tool = %call.name, summary = %explained.summary, "Tool returned");
            }
            call.succeeded(value)
        }
        Ok(Err(e)) => {
            warn!(id = %call.id, tool = %call.name, error = %e, "Tool failed");
            call.failed(FailureKind::Failed, format!("{e:#}"))
        }
        Err(e) => {
            warn!(id = %call.id, tool = %call.name, error = %e, "Tool panicked");
            call.failed(FailureKind::Panicked, e.to_string())
        }
    }
}

/// Send a call over the bus and wait for the result with the same id.
pub(crate) async fn call(runtime: &Runtime, name: &str, args: Value) -> Result<Value> {
    let id = Uuid::new_v4().to_string();
    // Subscribe before publishing so the answer cannot be missed.
    let wanted = id.clone();
    let mut results = runtime.log.cursor().filter(move |e| {
        tool_result_event().matches(e) && e.data.get("id").and_then(Value::as_str) == Some(&wanted)
    });
    runtime
        .log
        .publish(tool_call_event().with(ToolCall::new(id.clone(), name, args))?)?;

    let Some(event) = results.next().await else {
        return Err(HearthError::BusClosed(format!(
            "no result for tool call '{id}' ({name})"
        )));
    };
    let Some(decoded) = tool_result_event().decode(&event) else {
        return Err(HearthError::BusClosed(format!(
            "unexpected event '{}' while waiting for tool call '{id}'",
            event.source
        )));
    };
    let result = decoded?;
    match result.outcome {
        ToolOutcome::Result(value) => Ok(value),
        ToolOutcome::Error(failure) => Err(match failure.kind {
            FailureKind::NotFound => HearthError::ToolNotFound(result.name),
            FailureKind::Failed | FailureKind::Panicked => HearthError::ToolFailed {
                name: result.name,
                message: failure.message,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::Tool;
    use serde_json::json;
    use std::time::Duration;

    fn runtime_with_echo() -> Runtime {
        let runtime = Runtime::new(64);
        runtime
            .tools
            .register(Tool::new("echo", "echo back `value`", |args: Value| async move {
                Ok(args["value"].clone())
            }))
            .unwrap();
        runtime
            .tools
            .register(Tool::new("fail", "always fails", |_args: Value| async move {
                anyhow::bail!("it broke")
            }))
            .unwrap();
        runtime
            .tools
            .register(Tool::new("sleepy", "waits `ms` then echoes", |args: Value| async move {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(args["value"].clone())
            }))
            .unwrap();
        install(&runtime);
        runtime
    }

    async fn result_for(cursor: hearth_bus::Cursor, id: &str) -> ToolResult {
        let wanted = id.to_string();
        let mut cursor = cursor.filter(move |e| {
            tool_result_event().matches(e) && e.data["id"] == Value::String(wanted.clone())
        });
        let event = tokio::time::timeout(Duration::from_secs(2), cursor.next())
            .await
            .unwrap()
            .unwrap();
        tool_result_event().decode(&event).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_echo_scenario() {
        let runtime = runtime_with_echo();
        let handle = runtime.dispatcher.spawn();
        let cursor = runtime.log.cursor();
        let call = ToolCall::new("1", "echo", json!({"value": "hi"}));
        runtime.log.publish(tool_call_event().with(call).unwrap()).unwrap();

        let result = result_for(cursor, "1").await;
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"id": "1", "name": "echo", "args": {"value": "hi"}, "result": "hi"})
        );
        runtime.log.close();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_unknown_tool_reports_failure_with_caller_id() {
        let runtime = runtime_with_echo();
        let handle = runtime.dispatcher.spawn();
        let cursor = runtime.log.cursor();
        let call = ToolCall::new("abc", "nope", json!({}));
        runtime.log.publish(tool_call_event().with(call).unwrap()).unwrap();

        let result = result_for(cursor, "abc").await;
        assert_eq!(result.id, "abc");
        assert!(matches!(
            result.outcome,
            ToolOutcome::Error(ref f) if f.kind == FailureKind::NotFound
        ));
        runtime.log.close();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_not_confused() {
        let runtime = runtime_with_echo();
        let handle = runtime.dispatcher.spawn();
        let slow_cursor = runtime.log.cursor();
        let fast_cursor = slow_cursor.tee();
        runtime
            .log
            .publish(
                tool_call_event()
                    .with(ToolCall::new("slow", "sleepy", json!({"ms": 100, "value": "s"})))
                    .unwrap(),
            )
            .unwrap();
        runtime
            .log
            .publish(
                tool_call_event()
                    .with(ToolCall::new("fast", "sleepy", json!({"ms": 0, "value": "f"})))
                    .unwrap(),
            )
            .unwrap();

        let fast = result_for(fast_cursor, "fast").await;
        let slow = result_for(slow_cursor, "slow").await;
        assert_eq!(fast.result(), Some(&json!("f")));
        assert_eq!(slow.result(), Some(&json!("s")));
        runtime.log.close();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_call_helper_maps_outcomes() {
        let runtime = runtime_with_echo();
        let handle = runtime.dispatcher.spawn();

        let value = call(&runtime, "echo", json!({"value": 3})).await.unwrap();
        assert_eq!(value, json!(3));

        let err = call(&runtime, "missing", json!({})).await.unwrap_err();
        assert!(matches!(err, HearthError::ToolNotFound(ref n) if n == "missing"));

        let err = call(&runtime, "fail", json!({})).await.unwrap_err();
        assert!(matches!(err, HearthError::ToolFailed { ref message, .. } if message.contains("it broke")));

        runtime.log.close();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_panicking_tool_is_reported() {
        let tools = ToolRegistry::new();
        tools
            .register(Tool::new("boom", "panics", |_args: Value| async move {
                panic!("kaboom");
            }))
            .unwrap();
        let result = execute(&tools, ToolCall::new("9", "boom", json!({}))).await;
        assert!(matches!(
            result.outcome,
            ToolOutcome::Error(ref f) if f.kind == FailureKind::Panicked
        ));
        assert_eq!(result.id, "9");
    }

    #[test]
    fn test_malformed_call_with_id_gets_reply() {
        let reply = malformed(&json!({"id": "m1", "name": 5}), "bad name").unwrap();
        let result = tool_result_event().decode(&reply).unwrap().unwrap();
        assert_eq!(result.id, "m1");
        assert!(!result.is_ok());
        assert!(malformed(&json!({"name": "x"}), "no id").is_none());
    }

    #[tokio::test]
    async fn test_numeric_id_still_gets_a_reply() {
        let runtime = runtime_with_echo();
        let handle = runtime.dispatcher.spawn();
        let cursor = runtime.log.cursor();
        let call = hearth_core::Event::new(
            tool_call_event().id().clone(),
            json!({"id": 42, "name": "echo", "args": {"value": "hi"}}),
        );
        runtime.log.publish(call).unwrap();

        let result = result_for(cursor, "42").await;
        assert_eq!(result.name, "echo");
        assert!(matches!(
            result.outcome,
            ToolOutcome::Error(ref f) if f.kind == FailureKind::Failed && f.message.contains("malformed")
        ));
        runtime.log.close();
        handle.join().await;
    }
}
