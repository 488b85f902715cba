//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_engine::dispatcher::Dispatcher;
use courier_engine::session::SessionController;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: AppConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn session(&self) -> &Arc<SessionController> {
        self.dispatcher.session()
    }
}
