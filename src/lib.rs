use std::sync::Arc;

use config::Config;
use services::{AuthService, SessionCleanupService};

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod router;
pub mod services;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub auth: Arc<AuthService>,
    pub cleanup: Arc<SessionCleanupService>,
}
