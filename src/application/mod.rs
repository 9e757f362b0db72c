//! Application services built on the query cache.

pub mod api;
pub mod error;
pub mod notifications;
pub mod posts;
pub mod session;
pub mod transport;
pub mod users;
