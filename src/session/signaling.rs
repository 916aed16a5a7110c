use serde::{Deserialize, Serialize};

use crate::remarks::Remark;

/// Capability role for room participants.
///
/// Admins and Developers may mutate the shared buffer and language;
/// Testers are read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Developer,
    Tester,
}

impl Role {
    /// Unknown role strings floor to read-only.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "Admin" => Role::Admin,
            "Developer" => Role::Developer,
            "Tester" => Role::Tester,
            _ => Role::Tester,
        }
    }

    pub fn can_edit(&self) -> bool {
        !matches!(self, Role::Tester)
    }
}

/// Events accepted from a client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userName")]
        user_name: String,
        role: String,
    },

    #[serde(rename = "leaveRoom")]
    LeaveRoom,

    #[serde(rename = "codeChange")]
    CodeChange {
        #[serde(rename = "roomId")]
        room_id: String,
        code: String,
    },

    #[serde(rename = "languageChange")]
    LanguageChange {
        #[serde(rename = "roomId")]
        room_id: String,
        language: String,
    },

    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userName")]
        user_name: String,
    },
}

/// Events delivered to client connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Point-to-point room state for the joining connection.
    #[serde(rename = "roomSnapshot")]
    RoomSnapshot {
        code: String,
        language: String,
        users: Vec<String>,
    },

    /// Full participant list, broadcast to peers after a join.
    #[serde(rename = "userJoined")]
    UserJoined { users: Vec<String> },

    /// Full participant list, broadcast to remaining peers after a leave.
    #[serde(rename = "userLeft")]
    UserLeft { users: Vec<String> },

    #[serde(rename = "codeUpdate")]
    CodeUpdate { code: String },

    #[serde(rename = "languageUpdate")]
    LanguageUpdate { language: String },

    #[serde(rename = "userTyping")]
    UserTyping { user: String, label: String },

    #[serde(rename = "typingCleared")]
    TypingCleared { user: String },

    #[serde(rename = "remark:update")]
    RemarkUpdate {
        #[serde(flatten)]
        remark: Remark,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_wire() {
        assert_eq!(Role::from_wire("Admin"), Role::Admin);
        assert_eq!(Role::from_wire("Developer"), Role::Developer);
        assert_eq!(Role::from_wire("Tester"), Role::Tester);
        // Unrecognized strings become read-only
        assert_eq!(Role::from_wire("superuser"), Role::Tester);
        assert_eq!(Role::from_wire(""), Role::Tester);
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Admin.can_edit());
        assert!(Role::Developer.can_edit());
        assert!(!Role::Tester.can_edit());
    }

    #[test]
    fn test_client_event_parse_join() {
        let json = r#"{"type":"join","roomId":"orbit-1","userName":"Ada","role":"Developer"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Join {
                room_id,
                user_name,
                role,
            } => {
                assert_eq!(room_id, "orbit-1");
                assert_eq!(user_name, "Ada");
                assert_eq!(role, "Developer");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_client_event_parse_code_change() {
        let json = r#"{"type":"codeChange","roomId":"orbit-1","code":"print(1)"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ClientEvent::CodeChange { .. }));
    }

    #[test]
    fn test_server_event_serialize_tag() {
        let event = ServerEvent::CodeUpdate {
            code: "let x = 1;".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "codeUpdate");
        assert_eq!(json["code"], "let x = 1;");
    }

    #[test]
    fn test_remark_update_flattens_fields() {
        let event = ServerEvent::RemarkUpdate {
            remark: Remark {
                room_id: "orbit-1".to_string(),
                user_name: "Ada".to_string(),
                text: "hello".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "remark:update");
        assert_eq!(json["roomId"], "orbit-1");
        assert_eq!(json["userName"], "Ada");
        assert_eq!(json["text"], "hello");
    }
}
