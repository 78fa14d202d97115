use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A text message in a 1:1 conversation.
///
/// `is_from_current_user` is a read-time projection and is never persisted;
/// anything loaded from storage carries `false` until the synchronizer
/// recomputes it against the session user.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub is_from_current_user: bool,
}

/// Delivery status, in the order a message normally moves through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "SENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
        }
    }

    /// Number of checkmarks a bubble shows for this status.
    pub fn checkmark_count(&self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered | MessageStatus::Read => 2,
        }
    }

    pub fn is_read(&self) -> bool {
        *self == MessageStatus::Read
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENDING" => Ok(MessageStatus::Sending),
            "SENT" => Ok(MessageStatus::Sent),
            "DELIVERED" => Ok(MessageStatus::Delivered),
            "READ" => Ok(MessageStatus::Read),
            other => Err(SyncError::Decode(format!("unknown message status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub is_current_user: bool,
    pub is_typing: bool,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Participant {
            user_id: user_id.into(),
            name: name.into(),
            avatar_url: None,
            is_online: false,
            is_current_user: false,
            is_typing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<Participant>,
    pub last_message: Option<Message>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl Conversation {
    pub fn other_participant(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| !p.is_current_user)
    }
}

/// Account returned by the backend's `me` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }

    /// Lenient parse; anything the client does not know is treated as pending.
    pub fn parse_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("completed") {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub item_name: String,
    pub status: TaskStatus,
    pub creator_id: i64,
    pub assignee_id: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Debt {
    pub id: i64,
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub amount: f64,
    pub is_settled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebtBalance {
    pub user_id: i64,
    pub username: String,
    pub total_owed: f64,
    pub total_owing: f64,
}

/// Parses backend timestamps. The API emits ISO-8601, sometimes without an
/// offset, in which case UTC is assumed.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, SyncError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| SyncError::Decode(format!("bad timestamp {s:?}: {e}")))
}

pub fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, SyncError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| SyncError::Decode(format!("timestamp out of range: {millis}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_checkmarks() {
        assert_eq!(MessageStatus::Sending.checkmark_count(), 0);
        assert_eq!(MessageStatus::Sent.checkmark_count(), 1);
        assert_eq!(MessageStatus::Delivered.checkmark_count(), 2);
        assert_eq!(MessageStatus::Read.checkmark_count(), 2);
        assert!(MessageStatus::Read.is_read());
        assert!(!MessageStatus::Delivered.is_read());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("DELIVERED".parse::<MessageStatus>().unwrap(), MessageStatus::Delivered);
        assert!("delivered".parse::<MessageStatus>().is_err());
        assert!("SEEN".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_other_participant() {
        let mut me = Participant::new("1", "You");
        me.is_current_user = true;
        let other = Participant::new("2", "Yusuf");
        let conversation = Conversation {
            id: "2".to_string(),
            participants: vec![me, other],
            last_message: None,
            last_message_timestamp: None,
            unread_count: 0,
        };
        assert_eq!(conversation.other_participant().unwrap().name, "Yusuf");
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let with_offset = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let naive = parse_timestamp("2024-05-01T10:00:00.250000").unwrap();
        assert_eq!(with_offset.timestamp(), naive.timestamp());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_task_status_lossy() {
        assert_eq!(TaskStatus::parse_lossy("COMPLETED"), TaskStatus::Completed);
        assert_eq!(TaskStatus::parse_lossy("archived"), TaskStatus::Pending);
    }
}
