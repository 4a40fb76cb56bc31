pub mod pattern;
pub mod pump;
pub mod source;

use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::model::{DeviceClass, DeviceKey};

pub use pattern::EventPattern;

pub const CONNECTION_ESTABLISHED: &str = "connection-established";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PreStart,
    Start,
    StartFailed,
    Paused,
    Unpaused,
    PreShutdown,
    Shutdown,
    ShutdownFailed,
    DomainAdd,
    DomainDelete,
    FeatureSet(String),
    FeatureDelete(String),
    PropertySet(String),
    DeviceAttach(DeviceClass),
    DeviceDetach(DeviceClass),
    DeviceListChange(DeviceClass),
    Stats,
    ConnectionEstablished,
    Unknown,
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "domain-pre-start" => return EventKind::PreStart,
            "domain-start" => return EventKind::Start,
            "domain-start-failed" => return EventKind::StartFailed,
            "domain-paused" => return EventKind::Paused,
            "domain-unpaused" => return EventKind::Unpaused,
            "domain-pre-shutdown" => return EventKind::PreShutdown,
            "domain-shutdown" => return EventKind::Shutdown,
            "domain-shutdown-failed" => return EventKind::ShutdownFailed,
            "domain-add" => return EventKind::DomainAdd,
            "domain-delete" => return EventKind::DomainDelete,
            "vm-stats" => return EventKind::Stats,
            CONNECTION_ESTABLISHED => return EventKind::ConnectionEstablished,
            _ => {}
        }

        let Some((head, arg)) = name.split_once(':') else {
            return EventKind::Unknown;
        };

        match head {
            "domain-feature-set" | "feature-set" => EventKind::FeatureSet(arg.to_string()),
            "domain-feature-delete" | "feature-delete" => {
                EventKind::FeatureDelete(arg.to_string())
            }
            "property-set" => EventKind::PropertySet(arg.to_string()),
            "device-attach" | "device-detach" | "device-list-change" => {
                let Ok(class) = arg.parse::<DeviceClass>() else {
                    return EventKind::Unknown;
                };
                match head {
                    "device-attach" => EventKind::DeviceAttach(class),
                    "device-detach" => EventKind::DeviceDetach(class),
                    _ => EventKind::DeviceListChange(class),
                }
            }
            _ => EventKind::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    subject: Option<String>,
    event: String,
    #[serde(default)]
    attrs: Map<String, Value>,
}

/// One notification from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The domain the event was fired on; `None` for application-wide events.
    pub subject: Option<String>,
    pub name: String,
    pub kind: EventKind,
    pub attrs: Map<String, Value>,
}

impl Event {
    pub fn new(subject: Option<&str>, name: impl AsRef<str>) -> Self {
        let name = name.as_ref().to_string();
        Self {
            subject: subject.map(|s| s.to_string()),
            kind: EventKind::parse(&name),
            name,
            attrs: Map::new(),
        }
    }

    pub fn on(subject: &str, name: impl AsRef<str>) -> Self {
        Self::new(Some(subject), name)
    }

    pub fn connection_established() -> Self {
        Self::new(None, CONNECTION_ESTABLISHED)
    }

    pub fn with_attr(mut self, key: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.as_ref().to_string(), value.into());
        self
    }

    pub fn from_line(line: &str) -> Result<Self> {
        let raw: RawEvent = serde_json::from_str(line)?;
        if raw.event.is_empty() {
            return Err(anyhow!("event without a name"));
        }

        Ok(Self {
            subject: raw.subject.filter(|s| !s.is_empty()),
            kind: EventKind::parse(&raw.event),
            name: raw.event,
            attrs: raw.attrs,
        })
    }

    /// The domain an event concerns. `domain-add`/`domain-delete` are fired on
    /// the application and name the domain in the `vm` attribute.
    pub fn vm(&self) -> Option<&str> {
        match self.kind {
            EventKind::DomainAdd | EventKind::DomainDelete => self
                .attr_str("vm")
                .or(self.subject.as_deref()),
            _ => self.subject.as_deref(),
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        match self.attrs.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Backend values are loosely typed: `"1"`, `true` and non-empty strings are set.
    pub fn attr_truthy(&self, key: &str) -> bool {
        match self.attrs.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Null) | None => false,
        }
    }

    pub fn device_key(&self, class: DeviceClass) -> Option<DeviceKey> {
        let value = self.attr_str("device")?;
        DeviceKey::parse(class, value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lifecycle_kinds() {
        assert_eq!(EventKind::parse("domain-start"), EventKind::Start);
        assert_eq!(EventKind::parse("domain-start-failed"), EventKind::StartFailed);
        assert_eq!(EventKind::parse("domain-pre-shutdown"), EventKind::PreShutdown);
        assert_eq!(EventKind::parse("domain-delete"), EventKind::DomainDelete);
    }

    #[test]
    fn test_parse_feature_spellings() {
        let expected = EventKind::FeatureSet("updates-available".to_string());
        assert_eq!(
            EventKind::parse("domain-feature-set:updates-available"),
            expected
        );
        assert_eq!(EventKind::parse("feature-set:updates-available"), expected);
        assert_eq!(
            EventKind::parse("domain-feature-delete:updates-available"),
            EventKind::FeatureDelete("updates-available".to_string())
        );
    }

    #[test]
    fn test_parse_device_kinds() {
        assert_eq!(
            EventKind::parse("device-attach:usb"),
            EventKind::DeviceAttach(DeviceClass::Usb)
        );
        assert_eq!(
            EventKind::parse("device-list-change:block"),
            EventKind::DeviceListChange(DeviceClass::Block)
        );
        assert_eq!(EventKind::parse("device-attach:gpu"), EventKind::Unknown);
    }

    #[test]
    fn test_unknown_names_are_not_errors() {
        assert_eq!(EventKind::parse("domain-hibernate"), EventKind::Unknown);
        assert_eq!(EventKind::parse("whatever:else"), EventKind::Unknown);
    }

    #[test]
    fn test_from_line() {
        let event = Event::from_line(
            r#"{"subject":"work","event":"device-attach:usb","attrs":{"device":"sys-usb:2-1"}}"#,
        )
        .unwrap();

        assert_eq!(event.vm(), Some("work"));
        assert_eq!(
            event.device_key(DeviceClass::Usb),
            Some(DeviceKey::new("sys-usb", DeviceClass::Usb, "2-1"))
        );
    }

    #[test]
    fn test_domain_add_names_vm_in_attrs() {
        let event = Event::from_line(r#"{"event":"domain-add","attrs":{"vm":"disp1234"}}"#).unwrap();
        assert_eq!(event.subject, None);
        assert_eq!(event.vm(), Some("disp1234"));
    }

    #[test]
    fn test_from_line_rejects_garbage() {
        assert!(Event::from_line("not json").is_err());
        assert!(Event::from_line(r#"{"subject":"work"}"#).is_err());
    }

    #[test]
    fn test_attr_truthy() {
        let event = Event::on("work", "feature-set:updates-available")
            .with_attr("value", "1")
            .with_attr("empty", "")
            .with_attr("flag", false);

        assert!(event.attr_truthy("value"));
        assert!(!event.attr_truthy("empty"));
        assert!(!event.attr_truthy("flag"));
        assert!(!event.attr_truthy("missing"));
    }
}
