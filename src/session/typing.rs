use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

/// Quiet window after which a typing indicator is cleared.
pub const TYPING_WINDOW: Duration = Duration::from_millis(2000);

/// Broadcast label for an active typer: first 8 characters of the display
/// name, an ellipsis, and "is Typing". Collisions between similarly-prefixed
/// names are cosmetic only.
pub fn typing_label(user_name: &str) -> String {
    let prefix: String = user_name.chars().take(8).collect();
    format!("{}... is Typing", prefix)
}

/// Emitted when a participant has been quiet for a full window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingExpiry {
    pub room_id: String,
    pub user_name: String,
}

/// Self-expiring "is typing" flags, one per (room, participant).
///
/// Rapid signals coalesce: each signal bumps a generation counter and arms a
/// fresh timer; a timer that wakes to find a newer generation does nothing,
/// so the indicator never flickers and clears exactly once per quiet period.
/// Expiries are delivered over a channel drained by the session server.
pub struct TypingMonitor {
    generations: Arc<Mutex<HashMap<(String, String), u64>>>,
    expiry_sender: mpsc::UnboundedSender<TypingExpiry>,
    window: Duration,
}

impl TypingMonitor {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TypingExpiry>) {
        Self::with_window(TYPING_WINDOW)
    }

    pub fn with_window(
        window: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TypingExpiry>) {
        let (expiry_sender, expiry_receiver) = mpsc::unbounded_channel();
        let monitor = Arc::new(Self {
            generations: Arc::new(Mutex::new(HashMap::new())),
            expiry_sender,
            window,
        });
        (monitor, expiry_receiver)
    }

    /// Record typing activity, re-arming the participant's expiry timer.
    pub async fn signal(&self, room_id: &str, user_name: &str) {
        let key = (room_id.to_string(), user_name.to_string());

        let generation = {
            let mut generations = self.generations.lock().await;
            let counter = generations.entry(key.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let generations = self.generations.clone();
        let sender = self.expiry_sender.clone();
        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;

            let expired = {
                let mut map = generations.lock().await;
                match map.get(&key) {
                    Some(current) if *current == generation => {
                        map.remove(&key);
                        true
                    }
                    // A newer signal re-armed the timer, or the flag was
                    // cleared on disconnect
                    _ => false,
                }
            };

            if expired {
                tracing::debug!(
                    room_id = %key.0,
                    user_name = %key.1,
                    "Typing indicator expired"
                );
                let _ = sender.send(TypingExpiry {
                    room_id: key.0,
                    user_name: key.1,
                });
            }
        });
    }

    /// Drop any pending timer for the participant without emitting an
    /// expiry. Used when a participant disconnects mid-keystroke.
    pub async fn clear(&self, room_id: &str, user_name: &str) {
        let key = (room_id.to_string(), user_name.to_string());
        let mut generations = self.generations.lock().await;
        generations.remove(&key);
    }
}
