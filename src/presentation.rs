//! Screen state machines. Each `reduce` takes the current state and one event
//! and returns the next state; nothing here touches I/O.

use std::collections::HashMap;

use chrono::{Duration, FixedOffset, NaiveDate};

use crate::gateway::ConnectionState;
use crate::models::{Message, MessageStatus, Participant, User};

/// Messages sharing a calendar day, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    pub date: NaiveDate,
    pub label: String,
    pub messages: Vec<Message>,
}

/// Splits messages into per-day groups, newest day and newest message first.
/// Days are calendar days at `offset`, the viewer's UTC offset.
pub fn group_by_date(messages: &[Message], offset: &FixedOffset, today: NaiveDate) -> Vec<MessageGroup> {
    let mut sorted: Vec<&Message> = messages.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut groups: Vec<MessageGroup> = Vec::new();
    for message in sorted {
        let date = message.timestamp.with_timezone(offset).date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.messages.push(message.clone()),
            _ => groups.push(MessageGroup {
                date,
                label: day_label(date, today),
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if date == today - Duration::days(1) {
        "Yesterday".to_string()
    } else {
        date.format("%b %-d, %Y").to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatState {
    Loading,
    Success {
        groups: Vec<MessageGroup>,
        other_participant: Option<Participant>,
        is_connected: bool,
        current_user_id: String,
    },
    Error {
        message: String,
        can_retry: bool,
    },
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    Conversation(Option<Participant>),
    Messages(Vec<Message>),
    Connection(ConnectionState),
    Failed(String),
    Retry,
}

/// Chat screen: the current state plus what it has learned so far about the
/// conversation, so events can arrive in any order.
#[derive(Debug, Clone)]
pub struct ChatScreen {
    pub state: ChatState,
    current_user_id: String,
    other_participant: Option<Participant>,
    is_connected: bool,
    offset: FixedOffset,
    today: NaiveDate,
}

impl ChatScreen {
    pub fn new(current_user_id: impl Into<String>, offset: FixedOffset, today: NaiveDate) -> Self {
        ChatScreen {
            state: ChatState::Loading,
            current_user_id: current_user_id.into(),
            other_participant: None,
            is_connected: false,
            offset,
            today,
        }
    }

    pub fn reduce(mut self, event: ChatEvent) -> Self {
        self.state = match (self.state, event) {
            (_, ChatEvent::Failed(message)) => ChatState::Error {
                message,
                can_retry: true,
            },
            (_, ChatEvent::Retry) => ChatState::Loading,
            (_, ChatEvent::Messages(messages)) => ChatState::Success {
                groups: group_by_date(&messages, &self.offset, self.today),
                other_participant: self.other_participant.clone(),
                is_connected: self.is_connected,
                current_user_id: self.current_user_id.clone(),
            },
            (state, ChatEvent::Conversation(participant)) => {
                self.other_participant = participant;
                match state {
                    ChatState::Success {
                        groups,
                        is_connected,
                        current_user_id,
                        ..
                    } => ChatState::Success {
                        groups,
                        other_participant: self.other_participant.clone(),
                        is_connected,
                        current_user_id,
                    },
                    other => other,
                }
            }
            (state, ChatEvent::Connection(connection)) => {
                self.is_connected = connection == ConnectionState::Connected;
                match state {
                    ChatState::Success {
                        groups,
                        other_participant,
                        current_user_id,
                        ..
                    } => ChatState::Success {
                        groups,
                        other_participant,
                        is_connected: self.is_connected,
                        current_user_id,
                    },
                    other => other,
                }
            }
        };
        self
    }
}

/// Messages in `state` that are new or whose status changed since the last
/// call, oldest first. `seen` carries the last status shown for each id.
pub fn unseen_messages(state: &ChatState, seen: &mut HashMap<String, MessageStatus>) -> Vec<Message> {
    let ChatState::Success { groups, .. } = state else {
        return Vec::new();
    };
    let mut fresh: Vec<Message> = groups
        .iter()
        .flat_map(|group| group.messages.iter())
        .filter(|message| seen.get(&message.id) != Some(&message.status))
        .cloned()
        .collect();
    fresh.reverse();
    for message in &fresh {
        seen.insert(message.id.clone(), message.status);
    }
    fresh
}

/// Shared by the tasks and debts screens.
#[derive(Debug, Clone, PartialEq)]
pub enum ListState<T> {
    Loading,
    Success(Vec<T>),
    Empty,
    Error(String),
}

#[derive(Debug, Clone)]
pub enum ListEvent<T> {
    /// Result of an explicit load.
    Loaded(Vec<T>),
    /// Snapshot pushed by the repository.
    Changed(Vec<T>),
    Failed(String),
    Retry,
}

impl<T> ListState<T> {
    pub fn reduce(self, event: ListEvent<T>) -> Self {
        match event {
            ListEvent::Loaded(items) if items.is_empty() => ListState::Empty,
            ListEvent::Loaded(items) => ListState::Success(items),
            ListEvent::Changed(items) => {
                if !items.is_empty() || matches!(self, ListState::Success(_)) {
                    ListState::Success(items)
                } else {
                    self
                }
            }
            ListEvent::Failed(message) => ListState::Error(message),
            ListEvent::Retry => ListState::Loading,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Unauthenticated,
    Loading,
    Authenticated(User),
    Error(String),
}

#[derive(Debug, Clone)]
pub enum AuthEvent {
    Started,
    Succeeded(User),
    Failed(String),
    Dismissed,
}

impl AuthState {
    pub fn reduce(self, event: AuthEvent) -> Self {
        match (self, event) {
            (_, AuthEvent::Started) => AuthState::Loading,
            (_, AuthEvent::Succeeded(user)) => AuthState::Authenticated(user),
            (_, AuthEvent::Failed(message)) => AuthState::Error(message),
            (AuthState::Error(_), AuthEvent::Dismissed) => AuthState::Unauthenticated,
            (state, AuthEvent::Dismissed) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{millis_to_datetime, MessageStatus};
    use chrono::{TimeZone, Utc};

    fn message_at(id: &str, year: i32, month: u32, day: u32, hour: u32) -> Message {
        let at = Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap();
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            content: id.to_string(),
            sender_id: "u2".to_string(),
            timestamp: millis_to_datetime(at.timestamp_millis()).unwrap(),
            status: MessageStatus::Sent,
            is_from_current_user: false,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_groups_are_labelled_by_day() {
        let messages = vec![
            message_at("c", 2024, 3, 10, 9),
            message_at("b", 2024, 3, 9, 23),
            message_at("d", 2024, 3, 10, 18),
            message_at("a", 2024, 3, 2, 12),
        ];
        let groups = group_by_date(&messages, &utc(), today());

        let labels: Vec<_> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, ["Today", "Yesterday", "Mar 2, 2024"]);
        assert_eq!(groups[0].messages.len(), 2);
        assert_eq!(groups[0].messages[0].id, "d");
    }

    #[test]
    fn test_days_follow_the_viewer_offset() {
        // 22:00 UTC on the 9th is already the 10th at UTC+3.
        let late = message_at("late", 2024, 3, 9, 22);
        let istanbul = FixedOffset::east_opt(3 * 3600).unwrap();

        assert_eq!(group_by_date(&[late.clone()], &utc(), today())[0].label, "Yesterday");
        assert_eq!(group_by_date(&[late], &istanbul, today())[0].label, "Today");
    }

    #[test]
    fn test_unseen_messages_reports_every_new_or_changed_message() {
        let mut seen = HashMap::new();
        let screen = ChatScreen::new("u1", utc(), today()).reduce(ChatEvent::Messages(vec![
            message_at("b", 2024, 3, 10, 9),
            message_at("a", 2024, 3, 10, 8),
        ]));
        let ids: Vec<_> = unseen_messages(&screen.state, &mut seen).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(unseen_messages(&screen.state, &mut seen).is_empty());

        let mut read = message_at("a", 2024, 3, 10, 8);
        read.status = MessageStatus::Read;
        let screen = screen.reduce(ChatEvent::Messages(vec![
            message_at("d", 2024, 3, 10, 11),
            message_at("c", 2024, 3, 10, 10),
            message_at("b", 2024, 3, 10, 9),
            read,
        ]));
        let ids: Vec<_> = unseen_messages(&screen.state, &mut seen).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["a", "c", "d"]);
    }

    #[test]
    fn test_chat_reaches_success_with_context() {
        let screen = ChatScreen::new("u1", utc(), today())
            .reduce(ChatEvent::Conversation(Some(Participant::new("u2", "Yusuf"))))
            .reduce(ChatEvent::Connection(ConnectionState::Connected))
            .reduce(ChatEvent::Messages(vec![message_at("a", 2024, 3, 10, 8)]));

        match screen.state {
            ChatState::Success {
                groups,
                other_participant,
                is_connected,
                current_user_id,
            } => {
                assert_eq!(groups.len(), 1);
                assert_eq!(other_participant.unwrap().name, "Yusuf");
                assert!(is_connected);
                assert_eq!(current_user_id, "u1");
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_chat_connection_changes_keep_messages() {
        let screen = ChatScreen::new("u1", utc(), today())
            .reduce(ChatEvent::Messages(vec![message_at("a", 2024, 3, 10, 8)]))
            .reduce(ChatEvent::Connection(ConnectionState::Error));
        assert!(matches!(
            screen.state,
            ChatState::Success { is_connected: false, ref groups, .. } if groups.len() == 1
        ));
    }

    #[test]
    fn test_chat_failure_and_retry() {
        let screen = ChatScreen::new("u1", utc(), today()).reduce(ChatEvent::Failed("database locked".into()));
        assert_eq!(
            screen.state,
            ChatState::Error {
                message: "database locked".into(),
                can_retry: true
            }
        );
        let screen = screen.reduce(ChatEvent::Retry);
        assert_eq!(screen.state, ChatState::Loading);
    }

    #[test]
    fn test_list_changed_needs_data_or_success() {
        let state: ListState<u32> = ListState::Loading;
        assert_eq!(state.clone().reduce(ListEvent::Changed(vec![])), ListState::Loading);
        assert_eq!(state.reduce(ListEvent::Loaded(vec![])), ListState::Empty);

        let state = ListState::Success(vec![1]);
        assert_eq!(state.reduce(ListEvent::Changed(vec![])), ListState::Success(vec![]));
        assert_eq!(ListState::Empty.reduce(ListEvent::Changed(vec![2])), ListState::Success(vec![2]));
    }

    #[test]
    fn test_list_failure_and_retry() {
        let state: ListState<u32> = ListState::Success(vec![1]).reduce(ListEvent::Failed("HTTP 500".into()));
        assert_eq!(state, ListState::Error("HTTP 500".into()));
        assert_eq!(state.reduce(ListEvent::Retry), ListState::Loading);
    }

    #[test]
    fn test_auth_transitions() {
        let user = User {
            id: 1,
            username: "can".into(),
            email: "can@example.com".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let state = AuthState::Unauthenticated.reduce(AuthEvent::Started);
        assert_eq!(state, AuthState::Loading);
        let state = state.reduce(AuthEvent::Failed("bad password".into()));
        assert_eq!(state.clone().reduce(AuthEvent::Dismissed), AuthState::Unauthenticated);
        let state = state.reduce(AuthEvent::Succeeded(user.clone()));
        assert_eq!(state.clone().reduce(AuthEvent::Dismissed), AuthState::Authenticated(user));
    }
}
