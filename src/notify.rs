use std::{
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Restart,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastCategory {
    Engine,
    Scripts,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub detail: Option<String>,
    pub level: ToastLevel,
    pub category: Option<ToastCategory>,
    pub expires_at: Instant,
}

impl Toast {
    pub fn new(message: impl Into<String>, level: ToastLevel) -> Self {
        let duration = match level {
            ToastLevel::Info => Duration::from_secs(3),
            ToastLevel::Restart | ToastLevel::Error => Duration::from_secs(8),
        };
        Self {
            message: message.into(),
            detail: None,
            level,
            category: None,
            expires_at: Instant::now() + duration,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, ToastLevel::Info)
    }

    pub fn restart(message: impl Into<String>, category: ToastCategory) -> Self {
        Self::new(message, ToastLevel::Restart).with_category(category)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, ToastLevel::Error)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_category(mut self, category: ToastCategory) -> Self {
        self.category = Some(category);
        self
    }

    fn same_slot(&self, other: &Toast) -> bool {
        match (&self.category, &other.category) {
            (Some(left), Some(right)) => left == right,
            (None, None) => self.message == other.message,
            _ => false,
        }
    }
}

/// Receiver for user-visible messages.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Keeps the currently visible toasts. A toast replaces an active one from
/// the same category, or with the same message when uncategorized.
#[derive(Default)]
pub struct ToastCenter {
    active: Mutex<Vec<Toast>>,
}

impl ToastCenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Toast>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active(&self) -> Vec<Toast> {
        let now = Instant::now();
        let mut active = self.lock();
        active.retain(|toast| toast.expires_at > now);
        active.clone()
    }

    pub fn dismiss_all(&self) {
        self.lock().clear();
    }
}

impl Notifier for ToastCenter {
    fn notify(&self, toast: Toast) {
        let now = Instant::now();
        let mut active = self.lock();
        active.retain(|existing| existing.expires_at > now && !existing.same_slot(&toast));
        active.push(toast);
    }
}

/// Forwards toasts to the log; the CLI front end uses this.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, toast: Toast) {
        let detail = toast.detail.as_deref().unwrap_or("");
        match toast.level {
            ToastLevel::Info => info!(target: "sine::toast", detail, "{}", toast.message),
            ToastLevel::Restart => warn!(target: "sine::toast", detail, "{}", toast.message),
            ToastLevel::Error => error!(target: "sine::toast", detail, "{}", toast.message),
        }
    }
}
