//! Notification Dispatcher – session-start messages for subscribed users.

use std::sync::Arc;

use livetiming_memory::{Recipient, SubscriptionStore};
use livetiming_middleware::TopicBus;
use livetiming_types::{FirstDriverEntered, LiveError, SessionCategory, topic};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::ChatSender;

/// Turns first-driver-entered events into chat messages for every
/// subscriber of the session's category.
pub struct NotificationDispatcher {
    store: Arc<SubscriptionStore>,
    sender: Arc<dyn ChatSender>,
}

impl NotificationDispatcher {
    /// Create a dispatcher reading recipients from `store` and delivering
    /// through `sender`.
    pub fn new(store: Arc<SubscriptionStore>, sender: Arc<dyn ChatSender>) -> Self {
        Self { store, sender }
    }

    /// Notify every subscriber of the event's category.
    ///
    /// Returns the number of messages delivered. Session types outside the
    /// five categories are ignored. A failed delivery is logged and does not
    /// stop the remaining ones.
    pub async fn handle(&self, event: &FirstDriverEntered) -> usize {
        let Some(category) = SessionCategory::from_session_type(&event.session_type) else {
            debug!(session = %event.session_type, "no notification category for session");
            return 0;
        };

        let recipients = match self.recipients(category).await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(category = %category, error = %e, "could not read notification subscribers");
                return 0;
            }
        };

        let text = message(event, category);
        let mut delivered = 0;
        for recipient in &recipients {
            match self.sender.send_message(&recipient.chat_id, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(user = %recipient.user_id, chat = %recipient.chat_id, error = %e, "notification not delivered"),
            }
        }
        info!(
            server = %event.server_id,
            category = %category,
            delivered,
            recipients = recipients.len(),
            "session start notified"
        );
        delivered
    }

    async fn recipients(&self, category: SessionCategory) -> Result<Vec<Recipient>, LiveError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.list_users_for_category(category))
            .await
            .map_err(|e| LiveError::Io(std::io::Error::other(e)))?
            .map_err(|e| LiveError::Io(std::io::Error::other(e)))
    }

    /// Consume `firstDriverEntered` until `cancel` fires.
    ///
    /// The subscription is registered before this returns.
    pub fn spawn(
        self,
        bus: &TopicBus<Arc<FirstDriverEntered>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut sub = bus.subscribe(topic::FIRST_DRIVER_ENTERED);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = sub.recv() => event,
                };
                let Some(event) = event else { break };
                self.handle(&event).await;
            }
            debug!("notification dispatcher stopped");
        })
    }
}

/// Chat text announcing a session start.
pub fn message(event: &FirstDriverEntered, category: SessionCategory) -> String {
    let track = if event.track_name.is_empty() {
        "an unknown track"
    } else {
        event.track_name.as_str()
    };
    format!(
        "🏁 {server}: {label} session is live at {track}.",
        server = event.server_name,
        label = category.label(),
    )
}
