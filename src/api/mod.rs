//! Backend REST API
//!
//! One `ApiClient` serves every endpoint; accounts and admin calls are
//! added to it in their own modules.

mod client;
mod accounts;
mod admin;
mod agreement;

pub use client::{ApiClient, ApiError, Auth};
pub use accounts::Registration;
