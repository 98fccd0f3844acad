pub mod auth;
pub mod delivery;
pub mod error;
pub mod lifecycle;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod store;
pub mod users;

#[cfg(test)]
mod testing;

pub use routes::router;
