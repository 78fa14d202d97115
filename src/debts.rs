use async_trait::async_trait;
use log::warn;
use tokio::sync::watch;

use crate::api::ApiClient;
use crate::classify::Refresh;
use crate::error::Result;
use crate::models::{Debt, DebtBalance};

pub struct DebtsRepository {
    api: ApiClient,
    balance: watch::Sender<Vec<DebtBalance>>,
}

impl DebtsRepository {
    pub fn new(api: ApiClient) -> Self {
        let (balance, _) = watch::channel(Vec::new());
        DebtsRepository { api, balance }
    }

    pub async fn load_balance(&self) -> Result<Vec<DebtBalance>> {
        let balances = self.api.debt_balance().await?;
        self.balance.send_replace(balances.clone());
        Ok(balances)
    }

    /// Not cached; every call hits the backend.
    pub async fn load_history(&self) -> Result<Vec<Debt>> {
        self.api.debt_history().await
    }

    pub async fn settle(&self, user_id: i64, amount: f64) -> Result<()> {
        self.api.settle_debt(user_id, amount).await?;
        if let Err(e) = self.load_balance().await {
            warn!("failed to reload balance after settling: {}", e);
        }
        Ok(())
    }

    pub fn observe(&self) -> watch::Receiver<Vec<DebtBalance>> {
        self.balance.subscribe()
    }
}

#[async_trait]
impl Refresh for DebtsRepository {
    async fn refresh(&self) -> Result<()> {
        self.load_balance().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{logged_in, serve_once};

    #[tokio::test]
    async fn test_refresh_reloads_balance() {
        let body = r#"{"user_id":2,"username":"yusuf","total_owed":0.0,"total_owing":40.0}"#;
        let (base_url, server) = serve_once("200 OK", body).await;
        let repository = DebtsRepository::new(logged_in(&base_url).await);
        let mut balance = repository.observe();

        repository.refresh().await.unwrap();
        assert!(balance.has_changed().unwrap());
        let current = balance.borrow_and_update().clone();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].total_owing, 40.0);
        assert!(server.await.unwrap().starts_with("GET /api/debts/balance"));
    }
}
