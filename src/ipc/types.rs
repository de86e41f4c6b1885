use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Settings;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Access token from `auth.login`; required by everything but health/workspace/login/logout.
    #[serde(default)]
    pub token: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        AppState {
            workspace: None,
            db: None,
            settings,
        }
    }
}
