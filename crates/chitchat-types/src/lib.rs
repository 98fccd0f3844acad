pub mod api;
pub mod events;
pub mod models;

/// Store-assigned numeric user identity.
pub type UserId = i64;

/// Store-assigned numeric message identity.
pub type MessageId = i64;
