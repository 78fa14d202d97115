use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::TokenStore;
use crate::error::{Result, SyncError};
use crate::gateway::MessageHistory;
use crate::models::{parse_timestamp, AuthToken, Debt, DebtBalance, Task, TaskStatus, User};
use crate::protocol::MessageEnvelope;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    token_type: String,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    id: i64,
    username: String,
    email: String,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct TaskDto {
    id: i64,
    item_name: String,
    status: String,
    creator_id: i64,
    assignee_id: i64,
    created_at: String,
    #[serde(default)]
    completed_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct TaskUpdate<'a> {
    status: &'a str,
}

#[derive(Debug, Deserialize)]
struct DebtDto {
    id: i64,
    debtor_id: i64,
    creditor_id: i64,
    amount: f64,
    is_settled: bool,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct DebtBalanceDto {
    user_id: i64,
    username: String,
    total_owed: f64,
    total_owing: f64,
}

#[derive(Debug, Serialize)]
struct SettleRequest {
    user_id: i64,
    amount: f64,
}

/// REST client for the chat backend.
///
/// Everything except `login` is bearer-authenticated with the token held in
/// the shared [`TokenStore`].
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: TokenStore,
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: TokenStore) -> Self {
        ApiClient {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.get().await.ok_or(SyncError::NotAuthenticated)?;
        Ok(builder.bearer_auth(token.access_token))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthToken> {
        let form = [
            ("username", username),
            ("password", password),
            ("grant_type", "password"),
        ];
        let response = self.http.post(self.url("/api/auth/login")).form(&form).send().await?;
        let body: LoginResponse = decode(response, "login").await?;
        Ok(AuthToken {
            access_token: body.access_token,
            token_type: body.token_type,
        })
    }

    /// Fetches the account behind `token`; used to validate a token before it
    /// is stored.
    pub async fn current_user(&self, token: &AuthToken) -> Result<User> {
        let response = self
            .http
            .get(self.url("/api/auth/me"))
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let dto: UserDto = decode(response, "current_user").await?;
        Ok(User {
            id: dto.id,
            username: dto.username,
            email: dto.email,
            created_at: parse_timestamp(&dto.created_at)?,
        })
    }

    pub async fn tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let mut request = self.http.get(self.url("/api/tasks"));
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        let response = self.authorized(request).await?.send().await?;
        let dtos: Vec<TaskDto> = decode(response, "tasks").await?;
        dtos.into_iter().map(task_from_dto).collect()
    }

    pub async fn update_task(&self, task_id: i64, status: TaskStatus) -> Result<Task> {
        let request = self
            .http
            .put(self.url(&format!("/api/tasks/{task_id}")))
            .json(&TaskUpdate { status: status.as_str() });
        let response = self.authorized(request).await?.send().await?;
        task_from_dto(decode(response, "update_task").await?)
    }

    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        let request = self.http.delete(self.url(&format!("/api/tasks/{task_id}")));
        let response = self.authorized(request).await?.send().await?;
        check(response, "delete_task").await.map(|_| ())
    }

    /// The backend returns a single balance object; it is wrapped so callers
    /// can treat balances as a list.
    pub async fn debt_balance(&self) -> Result<Vec<DebtBalance>> {
        let request = self.http.get(self.url("/api/debts/balance"));
        let response = self.authorized(request).await?.send().await?;
        let dto: DebtBalanceDto = decode(response, "debt_balance").await?;
        Ok(vec![DebtBalance {
            user_id: dto.user_id,
            username: dto.username,
            total_owed: dto.total_owed,
            total_owing: dto.total_owing,
        }])
    }

    pub async fn debt_history(&self) -> Result<Vec<Debt>> {
        let request = self.http.get(self.url("/api/debts/history"));
        let response = self.authorized(request).await?.send().await?;
        let dtos: Vec<DebtDto> = decode(response, "debt_history").await?;
        dtos.into_iter()
            .map(|dto| {
                Ok(Debt {
                    id: dto.id,
                    debtor_id: dto.debtor_id,
                    creditor_id: dto.creditor_id,
                    amount: dto.amount,
                    is_settled: dto.is_settled,
                    created_at: parse_timestamp(&dto.created_at)?,
                })
            })
            .collect()
    }

    pub async fn settle_debt(&self, user_id: i64, amount: f64) -> Result<()> {
        let request = self
            .http
            .post(self.url("/api/debts/settle"))
            .json(&SettleRequest { user_id, amount });
        let response = self.authorized(request).await?.send().await?;
        check(response, "settle_debt").await.map(|_| ())
    }
}

#[async_trait]
impl MessageHistory for ApiClient {
    async fn fetch_messages(&self, other_user_id: &str, limit: u32) -> Result<Vec<MessageEnvelope>> {
        let request = self
            .http
            .get(self.url("/api/messages/"))
            .query(&[("other_user_id", other_user_id.to_string()), ("limit", limit.to_string())]);
        let response = self.authorized(request).await?.send().await?;
        let messages: Vec<MessageEnvelope> = decode(response, "fetch_messages").await?;
        debug!("fetched {} message(s) with {}", messages.len(), other_user_id);
        Ok(messages)
    }
}

fn task_from_dto(dto: TaskDto) -> Result<Task> {
    let completed_at = match dto.completed_at.as_deref() {
        Some(ts) => Some(parse_timestamp(ts)?),
        None => None,
    };
    Ok(Task {
        id: dto.id,
        item_name: dto.item_name,
        status: TaskStatus::parse_lossy(&dto.status),
        creator_id: dto.creator_id,
        assignee_id: dto.assignee_id,
        created_at: parse_timestamp(&dto.created_at)?,
        completed_at,
    })
}

/// Maps a non-2xx response to [`SyncError::Http`] carrying the body text.
async fn check(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("{} failed with status {}: {}", operation, status, body);
    Err(SyncError::Http {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response, operation: &str) -> Result<T> {
    let response = check(response, operation).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers exactly one HTTP request with the given status and JSON body,
    /// returning the server's base URL and a handle yielding the request head.
    pub(crate) async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    pub(crate) async fn logged_in(base_url: &str) -> ApiClient {
        let tokens = TokenStore::new();
        tokens
            .set(AuthToken {
                access_token: "secret-token".to_string(),
                token_type: "bearer".to_string(),
            })
            .await;
        ApiClient::new(base_url, tokens)
    }

    #[tokio::test]
    async fn test_fetch_without_token_is_not_authenticated() {
        let client = ApiClient::new("http://127.0.0.1:9", TokenStore::new());
        let result = client.fetch_messages("2", 50).await;
        assert!(matches!(result, Err(SyncError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_fetch_messages_sends_bearer_and_query() {
        let body = r#"[{"id":"m1","conversation_id":"c1","content":"hi","sender_id":"2","timestamp":1000,"status":"SENT"}]"#;
        let (base_url, server) = serve_once("200 OK", body).await;
        let client = logged_in(&base_url).await;

        let messages = client.fetch_messages("2", 50).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/messages/?other_user_id=2&limit=50"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret-token"));
    }

    #[tokio::test]
    async fn test_non_success_status_carries_body() {
        let (base_url, server) = serve_once("403 Forbidden", r#"{"detail":"nope"}"#).await;
        let client = logged_in(&base_url).await;

        match client.fetch_messages("2", 10).await {
            Err(SyncError::Http { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.contains("nope"));
            }
            other => panic!("expected http error, got {:?}", other.map(|m| m.len())),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_debt_balance_is_wrapped_in_list() {
        let body = r#"{"user_id":1,"username":"can","total_owed":12.5,"total_owing":3.0}"#;
        let (base_url, server) = serve_once("200 OK", body).await;
        let client = logged_in(&base_url).await;

        let balances = client.debt_balance().await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].username, "can");
        assert_eq!(balances[0].total_owed, 12.5);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_posts_form() {
        let body = r#"{"access_token":"tok","token_type":"bearer"}"#;
        let (base_url, server) = serve_once("200 OK", body).await;
        let client = ApiClient::new(&base_url, TokenStore::new());

        let token = client.login("can", "123456").await.unwrap();
        assert_eq!(token.access_token, "tok");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/auth/login"));
        assert!(request.to_ascii_lowercase().contains("application/x-www-form-urlencoded"));
    }
}
