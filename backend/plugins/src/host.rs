//! Host: assembles plugins, runs them, and stops them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use hearth_bus::{Cursor, DispatcherHandle, DEFAULT_TRIM_THRESHOLD};
use hearth_core::{
    halt_event, plugin_register_event, plugin_unregister_event, Event, HearthError, Phase,
    Result, ToolRegistry,
};

use crate::lifecycle;
use crate::plugin::{Plugin, PluginInfo};
use crate::registry::{PluginRegistry, Registered};
use crate::runtime::Runtime;
use crate::tools;

/// Collects plugins before the host starts.
///
/// ```
/// use hearth_plugins::{define_plugin, HostBuilder};
///
/// # async fn demo() -> hearth_core::Result<()> {
/// let mut builder = HostBuilder::new();
/// builder.add(define_plugin("noop", |_ctx| Ok(None)))?;
/// let host = builder.run()?;
/// host.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct HostBuilder {
    registry: PluginRegistry,
    trim_threshold: usize,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            registry: PluginRegistry::new(),
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
        }
    }

    /// Retained-entry count above which the event log trims consumed events.
    pub fn trim_threshold(&mut self, threshold: usize) -> &mut Self {
        self.trim_threshold = threshold;
        self
    }

    /// Configuration section for the plugin called `name`. Must be set
    /// before that plugin is added.
    pub fn plugin_config(&mut self, name: impl Into<String>, config: Value) -> &mut Self {
        self.registry.set_config(name, config);
        self
    }

    pub fn with_plugin_configs(&mut self, configs: BTreeMap<String, Value>) -> &mut Self {
        for (name, config) in configs {
            self.registry.set_config(name, config);
        }
        self
    }

    /// Register a plugin. Fails on an invalid or already registered name.
    pub fn add(&mut self, plugin: impl Plugin + 'static) -> Result<&mut Self> {
        self.add_shared(Arc::new(plugin))
    }

    pub fn add_shared(&mut self, plugin: Arc<dyn Plugin>) -> Result<&mut Self> {
        self.registry.add(plugin)?;
        Ok(self)
    }

    /// Snapshot of the registered plugins.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.registry.iter().map(|r| r.state.info()).collect()
    }

    /// Start the host. Returns as soon as the register phase is under way;
    /// use [`Host::wait_for_phase`] to wait for it to finish.
    pub fn run(self) -> Result<Host> {
        tokio::runtime::Handle::try_current().map_err(|_| HearthError::NoRuntime)?;

        let runtime = Arc::new(Runtime::new(self.trim_threshold));
        let plugins = self.registry.snapshot();
        lifecycle::install(&runtime, plugins.clone());
        tools::install(&runtime);

        runtime.phase.set(Phase::Registering);
        let dispatcher = runtime.dispatcher.spawn();
        runtime.log.publish(plugin_register_event().with(())?)?;
        info!(plugins = plugins.len(), "Host started");

        Ok(Host {
            runtime,
            plugins,
            dispatcher: Mutex::new(Some(dispatcher)),
            stopped: tokio::sync::Mutex::new(false),
        })
    }
}

/// A running set of plugins.
pub struct Host {
    runtime: Arc<Runtime>,
    plugins: Vec<Registered>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
    stopped: tokio::sync::Mutex<bool>,
}

impl Host {
    /// Snapshot of every plugin's state.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(|r| r.state.info()).collect()
    }

    /// Live view of the shared tool map.
    pub fn tools(&self) -> &ToolRegistry {
        &self.runtime.tools
    }

    pub fn phase(&self) -> Phase {
        self.runtime.phase.get()
    }

    /// Resolve once the host has reached `phase` (or a later one).
    pub async fn wait_for_phase(&self, phase: Phase) -> Result<Phase> {
        self.runtime.phase.wait_until(phase).await
    }

    /// Publish an event from outside any plugin.
    pub fn send_event(&self, event: Event) -> Result<u64> {
        self.runtime.publish(event)
    }

    /// Invoke a tool through the bus and wait for its result.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        tools::call(&self.runtime, name, args).await
    }

    /// Events from the latest barrier onward (or from the oldest event the
    /// log still retains), without the register and unregister sentinels.
    pub fn stream(&self) -> Cursor {
        self.runtime.cursors.stream()
    }

    /// Run every plugin's cleanup and shut the bus down.
    ///
    /// Waits for registration to finish first, so stopping right after
    /// [`HostBuilder::run`] is fine. Calling it again is a no-op; concurrent
    /// callers wait for the first one.
    pub async fn stop(&self) -> Result<()> {
        let mut stopped = self.stopped.lock().await;
        if *stopped {
            debug!("Host already stopped");
            return Ok(());
        }
        let result = self.shutdown().await;
        *stopped = true;
        result
    }

    async fn shutdown(&self) -> Result<()> {
        let result = self.drain_lifecycle().await;
        self.runtime.log.close();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.join().await;
        }
        self.runtime.dispatcher.clear();
        match &result {
            Ok(()) => info!("Host stopped"),
            Err(e) => warn!(error = %e, "Host stopped before the lifecycle completed"),
        }
        result
    }

    async fn drain_lifecycle(&self) -> Result<()> {
        self.barrier(Phase::Registering).await?;
        self.runtime.phase.set(Phase::Unregistering);
        self.runtime
            .log
            .publish(plugin_unregister_event().with(())?)?;
        self.barrier(Phase::Unregistering).await
    }

    /// Consume the stream up to and including `halt(phase)`.
    ///
    /// Anyone can drain the latest cursor through `wait_for`, so the halt may
    /// already be behind it; in that case there is nothing left to wait for.
    async fn barrier(&self, phase: Phase) -> Result<()> {
        let halt = self.runtime.phase.halt_seq(phase).await?;
        let drained = self
            .runtime
            .cursors
            .wait_for(|cursor| async move {
                if cursor.position() > halt {
                    return None;
                }
                Some(cursor.until(move |e| e.seq >= halt).collect().await)
            })
            .await;
        match drained {
            None => {
                debug!(%phase, halt, "Barrier already drained");
                Ok(())
            }
            Some(events) => match events.last() {
                Some(last) if is_halt(last, phase) => {
                    debug!(%phase, events = events.len(), "Barrier reached");
                    Ok(())
                }
                _ => Err(HearthError::BusClosed(format!(
                    "event log closed before halt({phase})"
                ))),
            },
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if let Some(handle) = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            debug!("Host dropped without stop, aborting dispatcher");
            handle.abort();
            self.runtime.log.close();
        }
        self.runtime.dispatcher.clear();
    }
}

fn is_halt(event: &Event, phase: Phase) -> bool {
    matches!(halt_event().decode(event), Some(Ok(p)) if p == phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{self, PluginContext};
    use crate::plugin::{define_plugin, PluginStatus};
    use hearth_core::{EventType, Tool};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn journaling(name: &'static str, journal: &Journal) -> impl Plugin {
        let journal = Arc::clone(journal);
        define_plugin(name, move |_ctx| {
            journal.lock().unwrap().push(format!("setup {name}"));
            let journal = Arc::clone(&journal);
            Ok(Some(Box::new(move || {
                journal.lock().unwrap().push(format!("cleanup {name}"));
            })))
        })
    }

    fn echo_plugin() -> impl Plugin {
        define_plugin("echo", |ctx| {
            ctx.set_description("echoes its input")?;
            ctx.declare_tool(
                Tool::new("echo", "return `value` unchanged", |args: Value| async move {
                    Ok(args["value"].clone())
                })
                .args(json!({"value": "any"})),
            )?;
            Ok(None)
        })
    }

    async fn running(builder: HostBuilder) -> Host {
        let host = builder.run().unwrap();
        tokio::time::timeout(Duration::from_secs(2), host.wait_for_phase(Phase::Running))
            .await
            .unwrap()
            .unwrap();
        host
    }

    #[tokio::test]
    async fn test_setup_once_in_order_and_cleanup_only_after_stop() {
        let journal = Journal::default();
        let mut builder = HostBuilder::new();
        for name in ["c", "a", "b"] {
            builder.add(journaling(name, &journal)).unwrap();
        }
        let host = running(builder).await;
        assert_eq!(*journal.lock().unwrap(), vec!["setup c", "setup a", "setup b"]);

        host.stop().await.unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["setup c", "setup a", "setup b", "cleanup c", "cleanup a", "cleanup b"]
        );
        assert_eq!(host.phase(), Phase::Stopped);
        assert!(host
            .plugins()
            .iter()
            .all(|p| p.status == PluginStatus::Stopped));
    }

    #[tokio::test]
    async fn test_immediate_stop_still_runs_setup_and_cleanup() {
        let journal = Journal::default();
        let mut builder = HostBuilder::new();
        builder.add(journaling("only", &journal)).unwrap();
        let host = builder.run().unwrap();
        host.stop().await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["setup only", "cleanup only"]);
    }

    #[tokio::test]
    async fn test_double_and_concurrent_stop_are_no_ops() {
        let journal = Journal::default();
        let mut builder = HostBuilder::new();
        builder.add(journaling("p", &journal)).unwrap();
        let host = running(builder).await;

        let (first, second) = tokio::join!(host.stop(), host.stop());
        first.unwrap();
        second.unwrap();
        host.stop().await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["setup p", "cleanup p"]);
    }

    #[tokio::test]
    async fn test_duplicate_tool_keeps_original_and_rolls_back_plugin() {
        let mut builder = HostBuilder::new();
        builder.add(echo_plugin()).unwrap();
        builder
            .add(define_plugin("copycat", |ctx| {
                ctx.declare_tool(Tool::new("copycat-extra", "installed first", |_args: Value| async move {
                    Ok(Value::Null)
                }))?;
                ctx.declare_tool(Tool::new("echo", "impostor", |_args: Value| async move {
                    Ok(json!("wrong"))
                }))?;
                Ok(None)
            }))
            .unwrap();
        let host = running(builder).await;

        assert_eq!(host.tools().get("echo").unwrap().description, "return `value` unchanged");
        assert!(!host.tools().contains("copycat-extra"));
        let copycat = host.plugins().into_iter().find(|p| p.name == "copycat").unwrap();
        assert!(matches!(copycat.status, PluginStatus::Failed(ref r) if r.contains("echo")));
        assert_eq!(
            host.call_tool("echo", json!({"value": "hi"})).await.unwrap(),
            json!("hi")
        );
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_setup_does_not_stop_other_plugins() {
        let journal = Journal::default();
        let mut builder = HostBuilder::new();
        builder
            .add(define_plugin("grenade", |_ctx| panic!("pin pulled")))
            .unwrap();
        builder.add(journaling("survivor", &journal)).unwrap();
        let host = running(builder).await;

        let infos = host.plugins();
        assert!(matches!(infos[0].status, PluginStatus::Failed(ref r) if r.contains("pin pulled")));
        assert_eq!(infos[1].status, PluginStatus::Active);
        host.stop().await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["setup survivor", "cleanup survivor"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_echo_scenario() {
        let mut builder = HostBuilder::new();
        builder.add(echo_plugin()).unwrap();
        let host = running(builder).await;

        let err = host.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, HearthError::ToolNotFound(ref n) if n == "missing"));
        assert_eq!(
            host.call_tool("echo", json!({"value": {"nested": [1, 2]}}))
                .await
                .unwrap(),
            json!({"nested": [1, 2]})
        );
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_define_event_ids_are_unique_across_plugins() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut builder = HostBuilder::new();
        for name in ["A", "B"] {
            let tx = tx.clone();
            builder
                .add(define_plugin(name, move |ctx| {
                    let first: EventType<()> = ctx.define_event(None)?;
                    let second: EventType<()> = context::define_event(None)?;
                    let labelled: EventType<()> = ctx.define_event(Some("msg"))?;
                    for ty in [first, second, labelled] {
                        tx.send(ty.id().to_string()).unwrap();
                    }
                    Ok(None)
                }))
                .unwrap();
        }
        drop(tx);
        let host = running(builder).await;
        host.stop().await.unwrap();

        let mut ids = Vec::new();
        while let Some(id) = rx.recv().await {
            ids.push(id);
        }
        assert_eq!(ids, vec!["A/0", "A/1", "A/msg/2", "B/0", "B/1", "B/msg/2"]);
    }

    #[tokio::test]
    async fn test_handlers_see_their_own_context() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut builder = HostBuilder::new();
        builder
            .add(define_plugin("listener", move |ctx| {
                let ping: EventType<u32> = ctx.define_event(Some("ping"))?;
                let tx = tx.clone();
                ctx.on_event(&ping, move |ctx: PluginContext, n: u32| {
                    let tx = tx.clone();
                    async move {
                        let ambient = context::current()?;
                        tx.send((ctx.name().to_string(), ambient.name().to_string(), n))?;
                        Ok(())
                    }
                })?;
                Ok(None)
            }))
            .unwrap();
        let host = running(builder).await;

        let ping = EventType::<u32>::new("listener/ping/0");
        host.send_event(ping.with(7).unwrap()).unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, ("listener".to_string(), "listener".to_string(), 7));
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_hides_register_sentinels() {
        let mut builder = HostBuilder::new();
        builder
            .add(define_plugin("talker", |ctx| {
                let hello: EventType<String> = ctx.define_event(Some("hello"))?;
                ctx.send_event(hello.with("hi".to_string())?)?;
                Ok(None)
            }))
            .unwrap();
        let host = builder.run().unwrap();
        let mut stream = host.stream();
        host.wait_for_phase(Phase::Running).await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.source.as_str(), "talker/hello/0");
        let second = stream.next().await.unwrap();
        assert!(is_halt(&second, Phase::Registering));
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_after_plugin_drained_the_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut builder = HostBuilder::new();
        builder
            .add(define_plugin("drainer", move |ctx| {
                let go: EventType<()> = ctx.define_event(Some("go"))?;
                let tx = tx.clone();
                ctx.on_event(&go, move |ctx: PluginContext, ()| {
                    let tx = tx.clone();
                    async move {
                        let done = EventType::<()>::new("drainer/done/0");
                        let seen = ctx
                            .wait_for(move |c| c.until(move |e| done.matches(e)).collect())
                            .await?;
                        tx.send(seen.len())?;
                        Ok(())
                    }
                })?;
                Ok(None)
            }))
            .unwrap();
        let host = running(builder).await;

        host.send_event(EventType::<()>::new("drainer/go/0").with(()).unwrap())
            .unwrap();
        host.send_event(EventType::<()>::new("drainer/done/0").with(()).unwrap())
            .unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, 2);

        tokio::time::timeout(Duration::from_secs(2), host.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(host.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_tool_can_use_ambient_context() {
        let mut builder = HostBuilder::new();
        builder
            .add(define_plugin("example", |ctx| {
                let finished: EventType<String> = ctx.define_event(Some("finished"))?;
                ctx.declare_tool(Tool::new("example-tool", "sends an event", move |_args: Value| {
                    let finished = finished.clone();
                    async move {
                        let plugin = context::current()?.name().to_string();
                        context::send_event(finished.with(plugin)?)?;
                        Ok::<_, anyhow::Error>(json!("sent"))
                    }
                }))?;
                Ok(None)
            }))
            .unwrap();
        let host = running(builder).await;
        let mut finished = host
            .stream()
            .filter(|e| e.source.as_str() == "example/finished/0");

        assert_eq!(
            host.call_tool("example-tool", json!({})).await.unwrap(),
            json!("sent")
        );
        let event = tokio::time::timeout(Duration::from_secs(2), finished.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data, json!("example"));
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_stays_bounded_while_running() {
        let mut builder = HostBuilder::new();
        builder.trim_threshold(16).add(echo_plugin()).unwrap();
        let host = running(builder).await;

        let chatter = EventType::<u32>::new("outside/chatter");
        for n in 0..500 {
            host.send_event(chatter.with(n).unwrap()).unwrap();
        }
        // A round trip through the dispatcher means it has read past the
        // chatter; the next publish lets the log trim.
        host.call_tool("echo", json!({"value": 1})).await.unwrap();
        host.send_event(chatter.with(500).unwrap()).unwrap();
        assert!(host.runtime.log.retained() <= 16);

        tokio::time::timeout(Duration::from_secs(2), host.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reserved_events_rejected_from_host() {
        let host = running(HostBuilder::new()).await;
        let err = host
            .send_event(plugin_unregister_event().with(()).unwrap())
            .unwrap_err();
        assert!(matches!(err, HearthError::ReservedEvent(_)));
        assert_eq!(host.phase(), Phase::Running);
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_runs_with_context_bound() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut builder = HostBuilder::new();
        builder
            .add(define_plugin("tidy", move |_ctx| {
                let tx = tx.clone();
                Ok(Some(Box::new(move || {
                    let name = context::current().map(|c| c.name().to_string());
                    tx.send(name.ok()).unwrap();
                })))
            }))
            .unwrap();
        let host = running(builder).await;
        host.stop().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("tidy"));
    }

    #[tokio::test]
    async fn test_plugin_config_reaches_setup() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut builder = HostBuilder::new();
        builder.plugin_config("configured", json!({"greeting": "hello"}));
        builder
            .add(define_plugin("configured", move |ctx| {
                tx.send(ctx.config()["greeting"].clone()).unwrap();
                Ok(None)
            }))
            .unwrap();
        let host = running(builder).await;
        assert_eq!(rx.recv().await.unwrap(), json!("hello"));
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_rejects_duplicate_plugin() {
        let mut builder = HostBuilder::new();
        builder.add(echo_plugin()).unwrap();
        assert!(matches!(
            builder.add(echo_plugin()),
            Err(HearthError::DuplicatePlugin(_))
        ));
        assert_eq!(builder.plugins().len(), 1);
        assert_eq!(builder.plugins()[0].status, PluginStatus::Pending);
    }

    #[test]
    fn test_run_outside_runtime_fails() {
        assert!(matches!(HostBuilder::new().run(), Err(HearthError::NoRuntime)));
    }
}
