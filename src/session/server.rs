use std::collections::HashMap;
use std::sync::Arc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use super::room::{Participant, RoomRegistry, RoomSnapshot};
use super::signaling::{Role, ServerEvent};
use super::typing::{typing_label, TypingExpiry, TypingMonitor};
use crate::remarks::Remark;

/// Room membership of a connection, set on join and cleared on leave.
#[derive(Debug, Clone)]
struct JoinedRoom {
    room_id: String,
    user_name: String,
    role: Role,
}

struct ConnectionHandle {
    sender: mpsc::UnboundedSender<Message>,
    joined: Option<JoinedRoom>,
}

/// Generate an opaque id for a new connection
pub fn generate_connection_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Applies registry mutations and fans events out to room peers.
///
/// Every inbound event is handled in two steps under the same call: mutate
/// the registry, then deliver the payload to every other connection in the
/// room. The originator never receives its own echo.
pub struct SessionServer {
    connections: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
    registry: Arc<RoomRegistry>,
    typing_monitor: Arc<TypingMonitor>,
    typing_expiry_receiver: Arc<RwLock<Option<mpsc::UnboundedReceiver<TypingExpiry>>>>,
}

impl SessionServer {
    pub fn new() -> Self {
        let (typing_monitor, typing_expiry_receiver) = TypingMonitor::new();

        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            registry: RoomRegistry::new(),
            typing_monitor,
            typing_expiry_receiver: Arc::new(RwLock::new(Some(typing_expiry_receiver))),
        }
    }

    #[cfg(test)]
    fn with_typing_window(window: std::time::Duration) -> Self {
        let (typing_monitor, typing_expiry_receiver) = TypingMonitor::with_window(window);

        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            registry: RoomRegistry::new(),
            typing_monitor,
            typing_expiry_receiver: Arc::new(RwLock::new(Some(typing_expiry_receiver))),
        }
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    /// Drain typing expiries in the background, broadcasting the cleared
    /// notification to the typer's room peers.
    pub fn start_typing_expiry_processing(self: Arc<Self>) {
        let server = self.clone();

        tokio::spawn(async move {
            let receiver = {
                let mut receiver_guard = server.typing_expiry_receiver.write().await;
                receiver_guard.take()
            };

            if let Some(mut rx) = receiver {
                while let Some(expiry) = rx.recv().await {
                    server
                        .broadcast_excluding_name(
                            &expiry.room_id,
                            &expiry.user_name,
                            &ServerEvent::TypingCleared {
                                user: expiry.user_name.clone(),
                            },
                        )
                        .await;
                }
            }
        });
    }

    /// Register a freshly opened connection's outbound channel.
    pub async fn add_connection(&self, connection_id: &str, sender: mpsc::UnboundedSender<Message>) {
        let mut connections = self.connections.write().await;
        connections.insert(
            connection_id.to_string(),
            ConnectionHandle {
                sender,
                joined: None,
            },
        );
        tracing::info!(connection_id = %connection_id, "Connection registered");
    }

    /// Remove a connection, leaving its room (if any) on the way out.
    pub async fn remove_connection(&self, connection_id: &str) {
        self.leave_current_room(connection_id).await;

        let mut connections = self.connections.write().await;
        connections.remove(connection_id);
        tracing::info!(connection_id = %connection_id, "Connection removed");
    }

    /// Join a room: registry mutation, snapshot to the joiner, full presence
    /// list to the peers. A join while already in a room leaves it first.
    pub async fn handle_join(
        &self,
        connection_id: &str,
        room_id: &str,
        user_name: &str,
        role_str: &str,
    ) {
        self.leave_current_room(connection_id).await;

        let role = Role::from_wire(role_str);
        let snapshot = self
            .registry
            .join(
                room_id,
                Participant {
                    connection_id: connection_id.to_string(),
                    user_name: user_name.to_string(),
                    role,
                },
            )
            .await;

        {
            let mut connections = self.connections.write().await;
            if let Some(handle) = connections.get_mut(connection_id) {
                handle.joined = Some(JoinedRoom {
                    room_id: room_id.to_string(),
                    user_name: user_name.to_string(),
                    role,
                });
            }
        }

        self.send_snapshot(connection_id, &snapshot).await;
        self.broadcast_to_room_except(
            room_id,
            connection_id,
            &ServerEvent::UserJoined {
                users: snapshot.users.clone(),
            },
        )
        .await;
    }

    /// Explicit leave requested by the client.
    pub async fn handle_leave(&self, connection_id: &str) {
        self.leave_current_room(connection_id).await;
    }

    /// Whole-buffer replace, then fan-out to peers. Read-only roles are
    /// dropped here, in one place, before any mutation.
    pub async fn handle_code_change(&self, connection_id: &str, room_id: &str, code: String) {
        if !self.may_edit(connection_id).await {
            tracing::debug!(
                connection_id = %connection_id,
                room_id = %room_id,
                "Dropping code change from read-only participant"
            );
            return;
        }

        if let Err(e) = self.registry.set_code(room_id, code.clone()).await {
            tracing::warn!(room_id = %room_id, error = %e, "Code change for unknown room");
            return;
        }

        self.broadcast_to_room_except(room_id, connection_id, &ServerEvent::CodeUpdate { code })
            .await;
    }

    pub async fn handle_language_change(
        &self,
        connection_id: &str,
        room_id: &str,
        language: String,
    ) {
        if !self.may_edit(connection_id).await {
            tracing::debug!(
                connection_id = %connection_id,
                room_id = %room_id,
                "Dropping language change from read-only participant"
            );
            return;
        }

        if let Err(e) = self.registry.set_language(room_id, language.clone()).await {
            tracing::warn!(room_id = %room_id, error = %e, "Language change for unknown room");
            return;
        }

        self.broadcast_to_room_except(
            room_id,
            connection_id,
            &ServerEvent::LanguageUpdate { language },
        )
        .await;
    }

    /// Relay the typing indicator to peers and re-arm the expiry timer.
    pub async fn handle_typing(&self, connection_id: &str, room_id: &str, user_name: &str) {
        self.broadcast_to_room_except(
            room_id,
            connection_id,
            &ServerEvent::UserTyping {
                user: user_name.to_string(),
                label: typing_label(user_name),
            },
        )
        .await;

        self.typing_monitor.signal(room_id, user_name).await;
    }

    /// Relay a freshly posted remark to the author's room peers.
    ///
    /// Remarks arrive over HTTP, so there is no originating connection to
    /// exclude; the author is skipped by display name instead (they already
    /// applied an optimistic local echo).
    pub async fn relay_remark(&self, remark: &Remark) {
        self.broadcast_excluding_name(
            &remark.room_id,
            &remark.user_name,
            &ServerEvent::RemarkUpdate {
                remark: remark.clone(),
            },
        )
        .await;
    }

    async fn may_edit(&self, connection_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections
            .get(connection_id)
            .and_then(|handle| handle.joined.as_ref())
            .map(|joined| joined.role.can_edit())
            .unwrap_or(false)
    }

    async fn leave_current_room(&self, connection_id: &str) {
        let joined = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(connection_id) {
                Some(handle) => handle.joined.take(),
                None => None,
            }
        };

        let Some(joined) = joined else {
            return;
        };

        // Drop any pending typing timer without a cleared broadcast; the
        // presence update already tells peers this participant is gone
        self.typing_monitor
            .clear(&joined.room_id, &joined.user_name)
            .await;

        if let Some(outcome) = self.registry.leave(&joined.room_id, connection_id).await {
            if let Some(remaining) = outcome.remaining {
                self.broadcast_to_room_except(
                    &joined.room_id,
                    connection_id,
                    &ServerEvent::UserLeft { users: remaining },
                )
                .await;
            }
        }
    }

    async fn send_snapshot(&self, connection_id: &str, snapshot: &RoomSnapshot) {
        self.send_to_connection(
            connection_id,
            &ServerEvent::RoomSnapshot {
                code: snapshot.code.clone(),
                language: snapshot.language.clone(),
                users: snapshot.users.clone(),
            },
        )
        .await;
    }

    async fn send_to_connection(&self, connection_id: &str, event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server event");
                return;
            }
        };

        let connections = self.connections.read().await;
        if let Some(handle) = connections.get(connection_id) {
            if let Err(e) = handle.sender.send(Message::text(text)) {
                tracing::error!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to deliver event to connection"
                );
            }
        }
    }

    /// Deliver an event to every connection in the room except the
    /// originator: N participants, N−1 deliveries.
    async fn broadcast_to_room_except(
        &self,
        room_id: &str,
        except_connection_id: &str,
        event: &ServerEvent,
    ) {
        let targets: Vec<String> = self
            .registry
            .connection_ids(room_id)
            .await
            .into_iter()
            .filter(|id| id != except_connection_id)
            .collect();

        self.deliver(room_id, &targets, event).await;
    }

    /// Deliver an event to every connection in the room whose display name
    /// differs from `except_user_name`.
    async fn broadcast_excluding_name(
        &self,
        room_id: &str,
        except_user_name: &str,
        event: &ServerEvent,
    ) {
        let targets: Vec<String> = {
            let connection_ids = self.registry.connection_ids(room_id).await;
            let connections = self.connections.read().await;
            connection_ids
                .into_iter()
                .filter(|id| {
                    connections
                        .get(id)
                        .and_then(|handle| handle.joined.as_ref())
                        .map(|joined| joined.user_name != except_user_name)
                        .unwrap_or(false)
                })
                .collect()
        };

        self.deliver(room_id, &targets, event).await;
    }

    async fn deliver(&self, room_id: &str, targets: &[String], event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server event");
                return;
            }
        };

        let connections = self.connections.read().await;
        for connection_id in targets {
            if let Some(handle) = connections.get(connection_id) {
                if let Err(e) = handle.sender.send(Message::text(text.clone())) {
                    tracing::error!(
                        room_id = %room_id,
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to deliver event to room peer"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    struct TestClient {
        id: String,
        receiver: mpsc::UnboundedReceiver<Message>,
    }

    impl TestClient {
        async fn connect(server: &SessionServer, id: &str) -> Self {
            let (sender, receiver) = mpsc::unbounded_channel();
            server.add_connection(id, sender).await;
            Self {
                id: id.to_string(),
                receiver,
            }
        }

        async fn join(&self, server: &SessionServer, room_id: &str, name: &str, role: &str) {
            server.handle_join(&self.id, room_id, name, role).await;
        }

        async fn next_event(&mut self) -> serde_json::Value {
            let message = timeout(Duration::from_millis(500), self.receiver.recv())
                .await
                .expect("event should arrive")
                .expect("channel open");
            serde_json::from_str(message.to_str().unwrap()).unwrap()
        }

        fn try_next_event(&mut self) -> Option<serde_json::Value> {
            self.receiver
                .try_recv()
                .ok()
                .map(|m| serde_json::from_str(m.to_str().unwrap()).unwrap())
        }
    }

    #[tokio::test]
    async fn test_joiner_receives_snapshot_and_peers_receive_list() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        ada.join(&server, "orbit-1", "Ada", "Developer").await;

        let snapshot = ada.next_event().await;
        assert_eq!(snapshot["type"], "roomSnapshot");
        assert_eq!(snapshot["code"], "// Start coding here...");
        assert_eq!(snapshot["language"], "javascript");

        let mut grace = TestClient::connect(&server, "conn_b").await;
        grace.join(&server, "orbit-1", "Grace", "Tester").await;

        let grace_snapshot = grace.next_event().await;
        assert_eq!(grace_snapshot["type"], "roomSnapshot");
        assert_eq!(
            grace_snapshot["users"],
            serde_json::json!(["Ada", "Grace"])
        );

        // Ada, the peer, sees the refreshed full list; Grace got no echo
        let joined = ada.next_event().await;
        assert_eq!(joined["type"], "userJoined");
        assert_eq!(joined["users"], serde_json::json!(["Ada", "Grace"]));
        assert!(grace.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_code_change_reaches_peers_but_not_originator() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut grace = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "Ada", "Developer").await;
        grace.join(&server, "orbit-1", "Grace", "Developer").await;
        ada.next_event().await; // snapshot
        ada.next_event().await; // userJoined for Grace
        grace.next_event().await; // snapshot

        server
            .handle_code_change("conn_a", "orbit-1", "print(42)".to_string())
            .await;

        let update = grace.next_event().await;
        assert_eq!(update["type"], "codeUpdate");
        assert_eq!(update["code"], "print(42)");
        assert!(ada.try_next_event().is_none(), "no echo to the originator");

        let snapshot = server.registry().snapshot("orbit-1").await.unwrap();
        assert_eq!(snapshot.code, "print(42)");
    }

    #[tokio::test]
    async fn test_n_minus_one_deliveries() {
        let server = SessionServer::new();
        let mut clients = Vec::new();
        for i in 0..4 {
            let id = format!("conn_{}", i);
            let mut client = TestClient::connect(&server, &id).await;
            client
                .join(&server, "orbit-1", &format!("user{}", i), "Developer")
                .await;
            client.next_event().await; // snapshot
            clients.push(client);
        }
        // Drain join broadcasts
        for client in clients.iter_mut() {
            while client.try_next_event().is_some() {}
        }

        server
            .handle_code_change("conn_0", "orbit-1", "x".to_string())
            .await;

        let mut deliveries = 0;
        for client in clients.iter_mut() {
            while let Some(event) = client.try_next_event() {
                assert_eq!(event["type"], "codeUpdate");
                assert_ne!(client.id, "conn_0");
                deliveries += 1;
            }
        }
        assert_eq!(deliveries, 3, "4 participants, exactly N-1 deliveries");
    }

    #[tokio::test]
    async fn test_tester_mutations_are_dropped() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut eve = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "Ada", "Developer").await;
        eve.join(&server, "orbit-1", "Eve", "Tester").await;
        ada.next_event().await;
        ada.next_event().await;
        eve.next_event().await;

        server
            .handle_code_change("conn_b", "orbit-1", "malicious".to_string())
            .await;
        server
            .handle_language_change("conn_b", "orbit-1", "cpp".to_string())
            .await;

        assert!(ada.try_next_event().is_none(), "tester writes never relay");
        let snapshot = server.registry().snapshot("orbit-1").await.unwrap();
        assert_eq!(snapshot.code, "// Start coding here...");
        assert_eq!(snapshot.language, "javascript");
    }

    #[tokio::test]
    async fn test_language_change_fans_out() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut grace = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "Ada", "Admin").await;
        grace.join(&server, "orbit-1", "Grace", "Tester").await;
        ada.next_event().await;
        ada.next_event().await;
        grace.next_event().await;

        server
            .handle_language_change("conn_a", "orbit-1", "python".to_string())
            .await;

        let update = grace.next_event().await;
        assert_eq!(update["type"], "languageUpdate");
        assert_eq!(update["language"], "python");
    }

    #[tokio::test]
    async fn test_leave_broadcasts_remaining_list() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut grace = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "Ada", "Developer").await;
        grace.join(&server, "orbit-1", "Grace", "Developer").await;
        ada.next_event().await;
        ada.next_event().await;
        grace.next_event().await;

        server.handle_leave("conn_b").await;

        let left = ada.next_event().await;
        assert_eq!(left["type"], "userLeft");
        assert_eq!(left["users"], serde_json::json!(["Ada"]));
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_membership() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut grace = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "Ada", "Developer").await;
        grace.join(&server, "orbit-1", "Grace", "Developer").await;
        ada.next_event().await;
        ada.next_event().await;
        grace.next_event().await;

        server.remove_connection("conn_b").await;

        let left = ada.next_event().await;
        assert_eq!(left["type"], "userLeft");
        assert_eq!(left["users"], serde_json::json!(["Ada"]));
        assert_eq!(server.registry().users("orbit-1").await, vec!["Ada"]);
    }

    #[tokio::test]
    async fn test_typing_relays_label_and_clears_after_quiet() {
        let server = Arc::new(SessionServer::with_typing_window(Duration::from_millis(50)));
        server.clone().start_typing_expiry_processing();

        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut grace = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "SpaceCadet42", "Developer").await;
        grace.join(&server, "orbit-1", "Grace", "Developer").await;
        ada.next_event().await;
        ada.next_event().await;
        grace.next_event().await;

        server
            .handle_typing("conn_a", "orbit-1", "SpaceCadet42")
            .await;

        let typing = grace.next_event().await;
        assert_eq!(typing["type"], "userTyping");
        assert_eq!(typing["user"], "SpaceCadet42");
        assert_eq!(typing["label"], "SpaceCad... is Typing");

        let cleared = grace.next_event().await;
        assert_eq!(cleared["type"], "typingCleared");
        assert_eq!(cleared["user"], "SpaceCadet42");

        assert!(ada.try_next_event().is_none(), "typer gets no echo");
    }

    #[tokio::test]
    async fn test_remark_relay_skips_author_by_name() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut grace = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "Ada", "Developer").await;
        grace.join(&server, "orbit-1", "Grace", "Developer").await;
        ada.next_event().await;
        ada.next_event().await;
        grace.next_event().await;

        server
            .relay_remark(&Remark {
                room_id: "orbit-1".to_string(),
                user_name: "Ada".to_string(),
                text: "ship it".to_string(),
            })
            .await;

        let update = grace.next_event().await;
        assert_eq!(update["type"], "remark:update");
        assert_eq!(update["userName"], "Ada");
        assert_eq!(update["text"], "ship it");
        assert!(
            ada.try_next_event().is_none(),
            "author applied an optimistic echo already"
        );
    }

    #[tokio::test]
    async fn test_events_do_not_cross_rooms() {
        let server = SessionServer::new();
        let mut ada = TestClient::connect(&server, "conn_a").await;
        let mut grace = TestClient::connect(&server, "conn_b").await;
        ada.join(&server, "orbit-1", "Ada", "Developer").await;
        grace.join(&server, "orbit-2", "Grace", "Developer").await;
        ada.next_event().await;
        grace.next_event().await;

        server
            .handle_code_change("conn_a", "orbit-1", "secret".to_string())
            .await;

        assert!(grace.try_next_event().is_none());
    }
}
