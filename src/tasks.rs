use async_trait::async_trait;
use log::warn;
use tokio::sync::watch;

use crate::api::ApiClient;
use crate::classify::Refresh;
use crate::error::Result;
use crate::models::{Task, TaskStatus};

/// Write-through access to the backend's task list with an in-memory
/// snapshot of the last successful load.
pub struct TasksRepository {
    api: ApiClient,
    snapshot: watch::Sender<Vec<Task>>,
}

impl TasksRepository {
    pub fn new(api: ApiClient) -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        TasksRepository { api, snapshot }
    }

    pub async fn load(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let tasks = self.api.tasks(status).await?;
        self.snapshot.send_replace(tasks.clone());
        Ok(tasks)
    }

    pub async fn update_status(&self, task_id: i64, status: TaskStatus) -> Result<Task> {
        let task = self.api.update_task(task_id, status).await?;
        self.reload_after("update").await;
        Ok(task)
    }

    pub async fn delete(&self, task_id: i64) -> Result<()> {
        self.api.delete_task(task_id).await?;
        self.reload_after("delete").await;
        Ok(())
    }

    pub fn observe(&self) -> watch::Receiver<Vec<Task>> {
        self.snapshot.subscribe()
    }

    async fn reload_after(&self, operation: &str) {
        if let Err(e) = self.load(None).await {
            warn!("failed to reload tasks after {}: {}", operation, e);
        }
    }
}

#[async_trait]
impl Refresh for TasksRepository {
    async fn refresh(&self) -> Result<()> {
        self.load(None).await.map(|_| ())
    }
}
