use murmur_api_types::User;
use serde_json::Value;

use crate::application::api::{GET_USERS, decode_list, settled_data};
use crate::application::error::AppError;
use crate::cache::{CacheKey, EntryData, QueryClient, Subscription};

#[derive(Clone)]
pub struct UsersService {
    client: QueryClient,
}

impl UsersService {
    pub fn new(client: QueryClient) -> Self {
        Self { client }
    }

    pub fn key() -> CacheKey {
        CacheKey::unit(GET_USERS)
    }

    pub async fn fetch_all(&self) -> Result<Vec<User>, AppError> {
        let result = self.client.query(GET_USERS, Value::Null).await?;
        let data = settled_data(&result.snapshot)?;
        decode_list(&data)
    }

    pub fn subscribe(&self) -> Result<Subscription, AppError> {
        Ok(self.client.subscribe(GET_USERS, Value::Null)?)
    }

    /// Cached users in server order; empty before the first fetch.
    pub fn select_all_users(&self) -> Result<Vec<User>, AppError> {
        match self.client.snapshot(&Self::key()).data {
            Some(data) => decode_list(&data),
            None => Ok(Vec::new()),
        }
    }

    pub fn select_user_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        let snapshot = self.client.snapshot(&Self::key());
        snapshot
            .data
            .as_deref()
            .and_then(EntryData::as_collection)
            .and_then(|users| users.get(id))
            .map(|record| record.to_typed())
            .transpose()
            .map_err(AppError::from)
    }
}
