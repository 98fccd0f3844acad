//! Shared fixtures for the crate's unit tests.

use std::sync::Arc;

use chitchat_db::Database;
use chitchat_db::models::NewUser;
use chitchat_gateway::{HeartbeatConfig, OutboundConfig, Registry};
use chitchat_types::UserId;
use chitchat_types::api::SendMessageRequest;

use crate::auth::{AuthConfig, issue_token};
use crate::delivery::Delivery;
use crate::lifecycle::{Lifecycle, OwnershipPolicy};
use crate::state::{AppState, AppStateInner};
use crate::store::Store;

pub struct Fixture {
    pub db: Arc<Database>,
    pub registry: Registry,
    pub state: AppState,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_ownership(OwnershipPolicy::default())
    }

    pub fn with_ownership(ownership: OwnershipPolicy) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Registry::new(OutboundConfig::default());
        let auth = AuthConfig {
            jwt_secret: "fixture-secret".into(),
            token_ttl: chrono::Duration::hours(1),
        };
        let state = AppStateInner::new(
            db.clone(),
            auth,
            registry.clone(),
            HeartbeatConfig::default(),
            ownership,
        );
        Self { db, registry, state }
    }

    /// Insert an active account directly, bypassing password hashing.
    pub fn user(&self, name: &str) -> UserId {
        self.db
            .create_user(&NewUser {
                username: name,
                email: &format!("{name}@example.com"),
                password_hash: "unused",
                first_name: "",
                last_name: "",
                date_of_birth: None,
                profile_pic: "",
            })
            .unwrap()
    }

    pub fn token(&self, id: UserId, name: &str) -> String {
        issue_token(&self.state.auth, id, name).unwrap()
    }

    pub fn store(&self) -> &Store {
        &self.state.store
    }

    pub fn delivery(&self) -> &Delivery {
        &self.state.delivery
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.state.lifecycle
    }
}

pub fn send_req(receiver_id: UserId, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        receiver_id,
        content: content.to_string(),
        image_url: None,
        group_id: None,
    }
}
