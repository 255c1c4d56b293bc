//! Transient notifications.
//!
//! At most one toast is visible. Showing a new one replaces the previous one,
//! and each toast's expiry timer only clears that same toast, so an old timer
//! firing late never hides a newer message.

use std::sync::Arc;
use std::time::Duration;

use soltan_core::{ToastKind, ToastMessage};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Toaster {
    tx: Arc<watch::Sender<Option<ToastMessage>>>,
    ttl: Duration,
}

impl Toaster {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            ttl,
        }
    }

    /// Show `message`, replacing whatever is visible, and schedule its expiry.
    pub fn show(&self, message: impl Into<String>, kind: ToastKind) -> ToastMessage {
        let toast = ToastMessage {
            id: Uuid::new_v4().to_string(),
            message: message.into(),
            kind,
        };
        debug!(message = %toast.message, ?kind, "Toast");
        self.tx.send_replace(Some(toast.clone()));

        // Without a runtime the toast simply stays until replaced.
        if let Ok(handle) = Handle::try_current() {
            let tx = Arc::clone(&self.tx);
            let id = toast.id.clone();
            let ttl = self.ttl;
            handle.spawn(async move {
                tokio::time::sleep(ttl).await;
                tx.send_if_modified(|current| {
                    if current.as_ref().is_some_and(|t| t.id == id) {
                        *current = None;
                        true
                    } else {
                        false
                    }
                });
            });
        }
        toast
    }

    pub fn success(&self, message: impl Into<String>) -> ToastMessage {
        self.show(message, ToastKind::Success)
    }

    pub fn info(&self, message: impl Into<String>) -> ToastMessage {
        self.show(message, ToastKind::Info)
    }

    /// The visible toast, if any.
    #[must_use]
    pub fn current(&self) -> Option<ToastMessage> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<ToastMessage>> {
        self.tx.subscribe()
    }
}
