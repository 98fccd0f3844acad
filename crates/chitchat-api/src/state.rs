use std::sync::Arc;

use chitchat_db::Database;
use chitchat_gateway::{HeartbeatConfig, Registry};

use crate::auth::AuthConfig;
use crate::delivery::Delivery;
use crate::lifecycle::{Lifecycle, OwnershipPolicy};
use crate::store::Store;

pub type AppState = Arc<AppStateInner>;

/// Everything a request handler can reach. Built once at startup from the
/// server configuration.
pub struct AppStateInner {
    pub store: Store,
    pub auth: AuthConfig,
    pub registry: Registry,
    pub heartbeat: HeartbeatConfig,
    pub delivery: Delivery,
    pub lifecycle: Lifecycle,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        auth: AuthConfig,
        registry: Registry,
        heartbeat: HeartbeatConfig,
        ownership: OwnershipPolicy,
    ) -> AppState {
        let store = Store::new(db);
        Arc::new(Self {
            delivery: Delivery::new(store.clone(), registry.clone()),
            lifecycle: Lifecycle::new(store.clone(), registry.clone(), ownership),
            store,
            auth,
            registry,
            heartbeat,
        })
    }
}
