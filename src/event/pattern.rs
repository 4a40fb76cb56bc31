use std::fmt;

/// Subscription filter over event names. A trailing `*` matches any suffix,
/// so `device-attach:*` covers every device class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
    Exact(String),
    Prefix(String),
}

impl EventPattern {
    pub fn new(pattern: impl AsRef<str>) -> Self {
        let pattern = pattern.as_ref();
        match pattern.strip_suffix('*') {
            Some(prefix) => EventPattern::Prefix(prefix.to_string()),
            None => EventPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            EventPattern::Exact(exact) => exact == name,
            EventPattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }

    pub fn any_matches(patterns: &[EventPattern], name: &str) -> bool {
        patterns.iter().any(|p| p.matches(name))
    }
}

impl From<&str> for EventPattern {
    fn from(value: &str) -> Self {
        EventPattern::new(value)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPattern::Exact(exact) => f.write_str(exact),
            EventPattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

pub fn patterns(list: &[&str]) -> Vec<EventPattern> {
    list.iter().map(|p| EventPattern::new(p)).collect()
}
