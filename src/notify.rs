use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Ms;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// To the customer who booked.
    BookingCreated,
    /// To the venue owner.
    BookingReceived,
    PaymentConfirmed,
    BookingCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: Ulid,
    pub kind: NotificationKind,
    pub booking_id: Ulid,
    pub at: Ms,
}

#[derive(Debug)]
pub enum NotifyError {
    /// The recipient subscribed once but every receiver has since gone away.
    Disconnected(Ulid),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Disconnected(id) => write!(f, "recipient {id} disconnected"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Broadcast hub keyed by recipient (customer or owner) id.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a recipient's notifications. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Remove the recipient's channel only while nobody listens on it, so a
    /// subscribe that raced in after a failed send keeps its receiver.
    fn drop_unheard(&self, recipient: Ulid) {
        self.channels.remove_if(&recipient, |_, tx| tx.receiver_count() == 0);
    }

    /// Returns how many receivers got it. No channel means nobody ever
    /// listened, which is not an error.
    pub fn send(&self, notification: &Notification) -> Result<usize, NotifyError> {
        let Some(sender) = self.channels.get(&notification.recipient) else {
            return Ok(0);
        };
        match sender.send(notification.clone()) {
            Ok(n) => Ok(n),
            Err(_) => {
                drop(sender);
                self.drop_unheard(notification.recipient);
                Err(NotifyError::Disconnected(notification.recipient))
            }
        }
    }
}
