use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Notifications sharing a tag replace each other and can be withdrawn.
    pub tag: Option<String>,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub is_error: bool,
    /// Intent the user can trigger straight from the notification.
    pub action: Option<String>,
}

impl Notification {
    pub fn new(title: impl AsRef<str>, body: impl AsRef<str>) -> Self {
        Self {
            tag: None,
            title: title.as_ref().to_string(),
            body: body.as_ref().to_string(),
            priority: Priority::Normal,
            is_error: false,
            action: None,
        }
    }

    pub fn error(title: impl AsRef<str>, body: impl AsRef<str>) -> Self {
        Self {
            priority: Priority::High,
            is_error: true,
            ..Self::new(title, body)
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl AsRef<str>) -> Self {
        self.tag = Some(tag.as_ref().to_string());
        self
    }

    pub fn with_action(mut self, action: impl AsRef<str>) -> Self {
        self.action = Some(action.as_ref().to_string());
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    fn withdraw(&self, tag: &str);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        if n.is_error {
            warn!("{}: {}", n.title, n.body);
        } else {
            info!("{}: {}", n.title, n.body);
        }
    }

    fn withdraw(&self, tag: &str) {
        info!("withdrawn notification {}", tag);
    }
}

/// Hands notifications to an external command such as `notify-send`.
/// `{title}`, `{body}` and `{urgency}` are substituted in the arguments.
pub struct CommandNotifier {
    template: Vec<String>,
}

impl CommandNotifier {
    pub fn new(template: Vec<String>) -> Self {
        Self { template }
    }

    fn args(&self, n: &Notification) -> Vec<String> {
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{title}", &n.title)
                    .replace("{body}", &n.body)
                    .replace("{urgency}", n.priority.as_str())
            })
            .collect()
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, notification: Notification) {
        LogNotifier.notify(notification.clone());

        let args = self.args(&notification);
        let Some((program, rest)) = args.split_first() else {
            return;
        };

        let mut command = Command::new(program);
        command.args(rest);

        tokio::spawn(async move {
            match command.status().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("notify command exited with {}", status),
                Err(e) => warn!("failed to run notify command: {}", e),
            }
        });
    }

    fn withdraw(&self, tag: &str) {
        LogNotifier.withdraw(tag);
    }
}
