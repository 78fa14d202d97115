use std::sync::Arc;

use log::{info, warn};
use tokio::sync::RwLock;

use crate::api::ApiClient;
use crate::error::{Result, SyncError};
use crate::models::{AuthToken, User};

/// An account the backend is seeded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownUser {
    pub username: &'static str,
    pub user_id: &'static str,
    pub name: &'static str,
}

pub static KNOWN_USERS: [KnownUser; 2] = [
    KnownUser {
        username: "can",
        user_id: "1",
        name: "Can",
    },
    KnownUser {
        username: "yusuf",
        user_id: "2",
        name: "Yusuf",
    },
];
pub const DEFAULT_PASSWORD: &str = "123456";

/// The seeded account on the other side of a chat with `user_id`.
pub fn counterpart_of(user_id: &str) -> Option<&'static KnownUser> {
    let mut others = KNOWN_USERS.iter().filter(|u| u.user_id != user_id);
    match (others.next(), others.next()) {
        (Some(other), None) => Some(other),
        _ => None,
    }
}

/// Shared slot holding the current bearer token. Cloning shares the slot.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<AuthToken>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<AuthToken> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, token: AuthToken) {
        *self.inner.write().await = Some(token);
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

/// Who the viewer is, handed explicitly to everything that needs to tell
/// "mine" from "theirs".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: String,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        SessionContext {
            user_id: user_id.into(),
        }
    }

    pub fn is_me(&self, sender_id: &str) -> bool {
        self.user_id == sender_id
    }
}

pub struct AuthRepository {
    api: ApiClient,
    tokens: TokenStore,
    user: RwLock<Option<User>>,
}

impl AuthRepository {
    pub fn new(api: ApiClient, tokens: TokenStore) -> Self {
        AuthRepository {
            api,
            tokens,
            user: RwLock::new(None),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let token = self.api.login(username, password).await?;
        self.tokens.set(token.clone()).await;
        let user = self.api.current_user(&token).await?;
        info!("logged in as {} (id {})", user.username, user.id);
        *self.user.write().await = Some(user.clone());
        Ok(user)
    }

    /// Revalidates the stored token against the backend. Any failure clears
    /// the stored token and user so an expired session is not reused.
    pub async fn current_user(&self) -> Result<User> {
        let token = self.tokens.get().await.ok_or(SyncError::NotAuthenticated)?;
        match self.api.current_user(&token).await {
            Ok(user) => {
                *self.user.write().await = Some(user.clone());
                Ok(user)
            }
            Err(e) => {
                warn!("stored token rejected: {}", e);
                self.logout().await;
                Err(e)
            }
        }
    }

    pub async fn token(&self) -> Option<AuthToken> {
        self.tokens.get().await
    }

    pub async fn current_user_id(&self) -> Option<String> {
        self.user.read().await.as_ref().map(|u| u.id.to_string())
    }

    pub async fn session(&self) -> Result<SessionContext> {
        self.current_user_id()
            .await
            .map(SessionContext::new)
            .ok_or(SyncError::NotAuthenticated)
    }

    pub async fn logout(&self) {
        self.tokens.clear().await;
        *self.user.write().await = None;
    }
}
