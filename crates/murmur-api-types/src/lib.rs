//! Wire types shared between the murmur data layer, its transports and test backends.
//!
//! Timestamps travel as RFC 3339 strings so that lexical order matches
//! chronological order, which is what the client-side comparators rely on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Push message type that carries notification batches.
pub const NOTIFICATIONS_MESSAGE_TYPE: &str = "notifications";

/// Reaction counters attached to every post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reactions {
    pub thumbs_up: u32,
    pub tada: u32,
    pub heart: u32,
    pub rocket: u32,
    pub eyes: u32,
}

impl Reactions {
    pub fn increment(&mut self, reaction: ReactionName) {
        let counter = match reaction {
            ReactionName::ThumbsUp => &mut self.thumbs_up,
            ReactionName::Tada => &mut self.tada,
            ReactionName::Heart => &mut self.heart,
            ReactionName::Rocket => &mut self.rocket,
            ReactionName::Eyes => &mut self.eyes,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn get(&self, reaction: ReactionName) -> u32 {
        match reaction {
            ReactionName::ThumbsUp => self.thumbs_up,
            ReactionName::Tada => self.tada,
            ReactionName::Heart => self.heart,
            ReactionName::Rocket => self.rocket,
            ReactionName::Eyes => self.eyes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReactionName {
    ThumbsUp,
    Tada,
    Heart,
    Rocket,
    Eyes,
}

impl ReactionName {
    /// Field name of this reaction inside [`Reactions`] on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThumbsUp => "thumbsUp",
            Self::Tada => "tada",
            Self::Heart => "heart",
            Self::Rocket => "rocket",
            Self::Eyes => "eyes",
        }
    }
}

impl fmt::Display for ReactionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post as served by `GET /posts` and `GET /posts/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub user: String,
    pub date: String,
    #[serde(default)]
    pub reactions: Reactions,
}

/// Body of `POST /posts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAdd {
    pub title: String,
    pub content: String,
    pub user: String,
}

/// Body of `PATCH /posts/:id`. Only the supplied fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Body of `POST /posts/:id/reactions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionAdd {
    pub reaction: ReactionName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Notification record as produced by the server, without client metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNotification {
    pub id: String,
    pub date: String,
    pub message: String,
    pub user: String,
}

/// Envelope of every message delivered over the push stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl StreamEnvelope {
    pub fn notifications(batch: &[ServerNotification]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: NOTIFICATIONS_MESSAGE_TYPE.to_string(),
            payload: serde_json::to_value(batch)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
}
