//! Notifications: real-time list, polling and client-side read state.

use murmur_api_types::ServerNotification;
use serde_json::Value;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::application::api::{GET_NOTIFICATIONS, decode_list, settled_data};
use crate::application::error::AppError;
use crate::application::transport::ApiRequest;
use crate::cache::{
    CacheKey, EntryData, NotificationMetadata, QueryClient, Record, Subscription,
};

/// A server notification joined with its client-only metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNotification {
    pub notification: ServerNotification,
    pub read: bool,
    pub is_new: bool,
}

#[derive(Clone)]
pub struct NotificationsService {
    client: QueryClient,
}

impl NotificationsService {
    pub fn new(client: QueryClient) -> Self {
        Self { client }
    }

    pub fn key() -> CacheKey {
        CacheKey::unit(GET_NOTIFICATIONS)
    }

    /// Subscribe to the notifications list. The first subscriber fetches the
    /// list and opens the push stream.
    pub fn subscribe(&self) -> Result<Subscription, AppError> {
        Ok(self.client.subscribe(GET_NOTIFICATIONS, Value::Null)?)
    }

    pub async fn fetch_all(&self) -> Result<Vec<ServerNotification>, AppError> {
        let result = self.client.query(GET_NOTIFICATIONS, Value::Null).await?;
        let data = settled_data(&result.snapshot)?;
        decode_list(&data)
    }

    /// Poll for notifications newer than the newest cached one and merge
    /// them like a push batch. Returns the merged ids.
    pub async fn fetch_new(&self) -> Result<Vec<String>, AppError> {
        let key = Self::key();
        if !self.client.contains(&key) {
            let result = self.client.query(GET_NOTIFICATIONS, Value::Null).await?;
            return Ok(settled_data(&result.snapshot)?.ids());
        }

        let since = self.latest_timestamp().unwrap_or_default();
        let encoded: String = form_urlencoded::byte_serialize(since.as_bytes()).collect();
        let request = ApiRequest::get(format!("/notifications?since={encoded}"));
        let merged = self.client.fetch_into(&key, request).await?;
        debug!(since = %since, merged = merged.len(), "Polled notifications");
        Ok(merged)
    }

    /// Date of the newest cached notification.
    pub fn latest_timestamp(&self) -> Option<String> {
        let snapshot = self.client.snapshot(&Self::key());
        snapshot
            .data
            .as_deref()
            .and_then(EntryData::as_collection)
            .and_then(|notifications| notifications.first())
            .and_then(|newest| newest.str_field("date"))
            .map(str::to_string)
    }

    pub fn mark_all_read(&self) {
        self.client.mark_all_read();
        info!("All notifications marked read");
    }

    pub fn unread_count(&self) -> usize {
        self.client.unread_count()
    }

    /// Cached notifications, newest first, with read / is-new flags.
    ///
    /// Ids the projector has not seen yet are reported unread and new.
    pub fn with_metadata(&self) -> Result<Vec<ClientNotification>, AppError> {
        let snapshot = self.client.snapshot(&Self::key());
        let Some(notifications) = snapshot.data.as_deref().and_then(EntryData::as_collection)
        else {
            return Ok(Vec::new());
        };
        notifications
            .iter()
            .map(|record| self.join(record))
            .collect()
    }

    fn join(&self, record: &Record) -> Result<ClientNotification, AppError> {
        let notification: ServerNotification = record.to_typed()?;
        let metadata = self
            .client
            .notification_metadata(&notification.id)
            .unwrap_or(NotificationMetadata {
                read: false,
                is_new: true,
            });
        Ok(ClientNotification {
            notification,
            read: metadata.read,
            is_new: metadata.is_new,
        })
    }
}
