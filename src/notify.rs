use parking_lot::Mutex;

/// Visual weight of a toast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Variant {
    #[default]
    Default,
    Destructive,
}

/// A user-visible toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub variant: Variant,
    pub title: String,
    pub description: String,
}

impl Notification {
    /// A failure toast.
    #[must_use]
    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            variant: Variant::Destructive,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Where user-visible failure messages go.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notification: Notification);
}

/// Sink that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifications {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifications {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl NotificationSink for MemoryNotifications {
    fn notify(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

/// Sink that writes notifications to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifications;

impl NotificationSink for TracingNotifications {
    fn notify(&self, notification: Notification) {
        match notification.variant {
            Variant::Destructive => tracing::warn!(
                title = %notification.title,
                description = %notification.description,
                "Auth notification"
            ),
            Variant::Default => tracing::info!(
                title = %notification.title,
                description = %notification.description,
                "Auth notification"
            ),
        }
    }
}
