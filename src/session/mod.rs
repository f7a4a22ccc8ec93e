//! Chat sessions: model, stores, persistence and the streaming chat itself
//!
//! Sessions live either in the backend (`RemoteSessionStore`) or in a local
//! SQLite file (`SqliteSessionStore`). `StreamingChat` drives one session's
//! exchanges and persists its transcript through a `PersistScheduler`.

mod session;
mod store;
mod database;
mod remote;
mod persist;
mod chat;
mod manager;

pub use session::*;
pub use store::SessionStore;
pub use database::{Database, SqliteSessionStore};
pub use remote::RemoteSessionStore;
pub use persist::PersistPolicy;
pub use chat::*;
pub use manager::SessionManager;
