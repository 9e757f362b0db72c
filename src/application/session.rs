use std::sync::RwLock;

use murmur_api_types::{LoginRequest, User};
use serde_json::{Value, json};
use tracing::info;

use crate::application::api::{LOGIN, LOGOUT};
use crate::application::error::AppError;
use crate::application::users::UsersService;
use crate::cache::QueryClient;
use crate::cache::lock::{rw_read, rw_write};

const SOURCE: &str = "application::session";

/// Signed-in user. Logging out resets the whole query cache.
pub struct SessionService {
    client: QueryClient,
    username: RwLock<Option<String>>,
}

impl SessionService {
    pub fn new(client: QueryClient) -> Self {
        Self {
            client,
            username: RwLock::new(None),
        }
    }

    pub async fn login(&self, username: &str) -> Result<(), AppError> {
        if username.trim().is_empty() {
            return Err(AppError::validation("username must not be empty"));
        }
        let request = LoginRequest {
            username: username.to_string(),
        };
        self.client.mutate(LOGIN, json!(request)).await?;
        *rw_write(&self.username, SOURCE, "login") = Some(request.username);
        info!(username, "Logged in");
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), AppError> {
        self.client.mutate(LOGOUT, Value::Null).await?;
        let previous = rw_write(&self.username, SOURCE, "logout").take();
        self.client.reset();
        info!(username = previous.as_deref().unwrap_or("-"), "Logged out");
        Ok(())
    }

    pub fn current_username(&self) -> Option<String> {
        rw_read(&self.username, SOURCE, "current_username").clone()
    }

    /// The signed-in user, resolved through the cached users list.
    pub fn current_user(&self) -> Result<Option<User>, AppError> {
        let Some(username) = self.current_username() else {
            return Ok(None);
        };
        UsersService::new(self.client.clone()).select_user_by_id(&username)
    }
}
