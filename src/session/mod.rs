mod room;
mod server;
mod signaling;
mod typing;

pub use room::{Participant, RoomRegistry, RoomSnapshot, DEFAULT_CODE, DEFAULT_LANGUAGE};
pub use server::{generate_connection_id, SessionServer};
pub use signaling::{ClientEvent, Role, ServerEvent};
pub use typing::{typing_label, TypingMonitor, TYPING_WINDOW};
