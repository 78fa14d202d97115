use crate::auth::SessionContext;
use crate::models::{Conversation, Participant};

/// Conversation metadata source. The backend has no conversation endpoint
/// yet, so this builds the single 1:1 conversation from what the client
/// already knows.
pub struct ConversationDirectory {
    peer_id: String,
    peer_name: String,
}

impl ConversationDirectory {
    pub fn new(peer_id: impl Into<String>, peer_name: impl Into<String>) -> Self {
        ConversationDirectory {
            peer_id: peer_id.into(),
            peer_name: peer_name.into(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Id of the conversation between the session user and the peer. Both
    /// sides compute the same value.
    pub fn conversation_id(&self, session: &SessionContext) -> String {
        direct_conversation_id(&session.user_id, &self.peer_id)
    }

    pub fn get(&self, conversation_id: &str, session: &SessionContext) -> Conversation {
        let mut me = Participant::new(session.user_id.clone(), "You");
        me.is_current_user = true;
        me.is_online = true;
        let mut peer = Participant::new(self.peer_id.clone(), self.peer_name.clone());
        peer.is_online = true;
        Conversation {
            id: conversation_id.to_string(),
            participants: vec![me, peer],
            last_message: None,
            last_message_timestamp: None,
            unread_count: 0,
        }
    }
}

/// `dm-<low>-<high>`; numeric ids compare as numbers, anything else as text.
pub fn direct_conversation_id(a: &str, b: &str) -> String {
    let a_first = match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x <= y,
        _ => a <= b,
    };
    let (low, high) = if a_first { (a, b) } else { (b, a) };
    format!("dm-{low}-{high}")
}
