use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reserved namespace for events owned by the host itself.
pub const CORE_NAMESPACE: &str = "core";

pub const PLUGIN_REGISTER: &str = "core/plugin-register";
pub const PLUGIN_UNREGISTER: &str = "core/plugin-unregister";
pub const HALT: &str = "core/halt";

/// Opaque identifier used as the pub/sub topic of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id belongs to the host's reserved namespace.
    pub fn is_core(&self) -> bool {
        self.0
            .split_once('/')
            .is_some_and(|(ns, _)| ns == CORE_NAMESPACE)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A published event. `seq` is assigned by the event log at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub source: EventId,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(source: EventId, data: serde_json::Value) -> Self {
        Self {
            seq: 0,
            source,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn is(&self, id: &EventId) -> bool {
        &self.source == id
    }
}

/// An event identifier paired with the type of its payload.
pub struct EventType<T = ()> {
    id: EventId,
    _payload: PhantomData<fn() -> T>,
}

impl<T> EventType<T> {
    pub fn new(id: impl Into<EventId>) -> Self {
        Self {
            id: id.into(),
            _payload: PhantomData,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.source == self.id
    }
}

impl<T: Serialize> EventType<T> {
    /// Build an unpublished event carrying `data`.
    pub fn with(&self, data: T) -> Result<Event> {
        Ok(Event::new(self.id.clone(), serde_json::to_value(data)?))
    }
}

impl<T: DeserializeOwned> EventType<T> {
    /// Decode the payload of `event`, or `None` if it has a different source.
    pub fn decode(&self, event: &Event) -> Option<Result<T>> {
        if !self.matches(event) {
            return None;
        }
        Some(serde_json::from_value(event.data.clone()).map_err(Into::into))
    }
}

impl<T> Clone for EventType<T> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

impl<T> fmt::Debug for EventType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventType").field(&self.id).finish()
    }
}

impl<T> PartialEq for EventType<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Lifecycle phases of a plugin host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    Registering,
    Running,
    Unregistering,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Registering => "registering",
            Phase::Running => "running",
            Phase::Unregistering => "unregistering",
            Phase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Sentinel that starts the registration phase.
pub fn plugin_register_event() -> EventType<()> {
    EventType::new(PLUGIN_REGISTER)
}

/// Sentinel that starts the unregistration phase.
pub fn plugin_unregister_event() -> EventType<()> {
    EventType::new(PLUGIN_UNREGISTER)
}

/// Barrier marking the end of a lifecycle phase. The payload is the phase it closes.
pub fn halt_event() -> EventType<Phase> {
    EventType::new(HALT)
}

/// Whether `event` is one of the lifecycle sentinels that start a phase.
pub fn is_lifecycle_sentinel(event: &Event) -> bool {
    matches!(event.source.as_str(), PLUGIN_REGISTER | PLUGIN_UNREGISTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip_payload() {
        let ty: EventType<String> = EventType::new("demo/msg/0");
        let event = ty.with("hello".to_string()).unwrap();
        assert_eq!(event.source.as_str(), "demo/msg/0");
        assert_eq!(ty.decode(&event).unwrap().unwrap(), "hello");
    }

    #[test]
    fn test_decode_other_source_is_none() {
        let a: EventType<u32> = EventType::new("a/0");
        let b: EventType<u32> = EventType::new("b/0");
        let event = a.with(7).unwrap();
        assert!(b.decode(&event).is_none());
    }

    #[test]
    fn test_core_namespace() {
        assert!(EventId::from(HALT).is_core());
        assert!(!EventId::from("corey/0").is_core());
        assert!(!EventId::from("echo/0").is_core());
    }

    #[test]
    fn test_halt_carries_phase() {
        let event = halt_event().with(Phase::Registering).unwrap();
        assert_eq!(event.data, serde_json::json!("registering"));
        assert_eq!(
            halt_event().decode(&event).unwrap().unwrap(),
            Phase::Registering
        );
        assert!(!is_lifecycle_sentinel(&event));
        assert!(is_lifecycle_sentinel(&plugin_register_event().with(()).unwrap()));
    }

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Created < Phase::Registering);
        assert!(Phase::Running < Phase::Stopped);
        assert_eq!(Phase::Unregistering.to_string(), "unregistering");
    }
}
