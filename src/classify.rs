use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::error::Result;
use crate::protocol::MessageEnvelope;

/// Something whose cached view can be reloaded from the backend.
#[async_trait]
pub trait Refresh: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Task,
    Expense,
    Normal,
    Unknown(String),
}

impl Classification {
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "TASK" => Classification::Task,
            "EXPENSE" => Classification::Expense,
            "NORMAL" => Classification::Normal,
            _ => Classification::Unknown(tag.to_string()),
        }
    }
}

/// Reacts to the classification tag the backend attaches to inbound messages.
///
/// The backend has already created the task or debt; this only refreshes the
/// matching collection so it shows up. Failures never leave this type.
#[derive(Clone)]
pub struct ClassificationRouter {
    tasks: Arc<dyn Refresh>,
    debts: Arc<dyn Refresh>,
}

impl ClassificationRouter {
    pub fn new(tasks: Arc<dyn Refresh>, debts: Arc<dyn Refresh>) -> Self {
        ClassificationRouter { tasks, debts }
    }

    pub async fn route(&self, message: &MessageEnvelope) {
        let Some(tag) = message.classification() else {
            return;
        };
        match Classification::parse(tag) {
            Classification::Task => {
                if let Err(e) = self.tasks.refresh().await {
                    warn!("failed to refresh tasks after classification of {}: {}", message.id, e);
                }
            }
            Classification::Expense => {
                if let Err(e) = self.debts.refresh().await {
                    warn!("failed to refresh debts after classification of {}: {}", message.id, e);
                }
            }
            Classification::Normal => {}
            Classification::Unknown(tag) => {
                debug!("ignoring unknown classification {:?} on {}", tag, message.id);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::AiAnalysis;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts refreshes and optionally fails each one.
    #[derive(Default)]
    pub(crate) struct CountingRefresh {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl CountingRefresh {
        pub fn failing() -> Self {
            CountingRefresh {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Refresh for CountingRefresh {
        async fn refresh(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SyncError::Http {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    fn tagged(tag: Option<&str>) -> MessageEnvelope {
        MessageEnvelope {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            content: "x".to_string(),
            sender_id: "2".to_string(),
            timestamp: 0,
            status: "SENT".to_string(),
            ai_analysis: tag.map(|t| AiAnalysis {
                classification: t.to_string(),
                extracted_data: None,
            }),
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Classification::parse("task"), Classification::Task);
        assert_eq!(Classification::parse("Expense"), Classification::Expense);
        assert_eq!(Classification::parse("NORMAL"), Classification::Normal);
        assert_eq!(Classification::parse("REMINDER"), Classification::Unknown("REMINDER".to_string()));
    }

    #[tokio::test]
    async fn test_task_refreshes_tasks_once() {
        let tasks = Arc::new(CountingRefresh::default());
        let debts = Arc::new(CountingRefresh::default());
        let router = ClassificationRouter::new(tasks.clone(), debts.clone());

        router.route(&tagged(Some("TASK"))).await;
        assert_eq!(tasks.count(), 1);
        assert_eq!(debts.count(), 0);

        router.route(&tagged(Some("EXPENSE"))).await;
        assert_eq!(tasks.count(), 1);
        assert_eq!(debts.count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_swallowed() {
        let tasks = Arc::new(CountingRefresh::failing());
        let debts = Arc::new(CountingRefresh::default());
        let router = ClassificationRouter::new(tasks.clone(), debts.clone());

        router.route(&tagged(Some("TASK"))).await;
        assert_eq!(tasks.count(), 1);
    }

    #[tokio::test]
    async fn test_untagged_normal_and_unknown_do_nothing() {
        let tasks = Arc::new(CountingRefresh::default());
        let debts = Arc::new(CountingRefresh::default());
        let router = ClassificationRouter::new(tasks.clone(), debts.clone());

        router.route(&tagged(None)).await;
        router.route(&tagged(Some("NORMAL"))).await;
        router.route(&tagged(Some("SOMETHING"))).await;
        assert_eq!(tasks.count() + debts.count(), 0);
    }
}
