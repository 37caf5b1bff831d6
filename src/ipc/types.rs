use std::path::PathBuf;

use crate::analytics::AnalyticsCache;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Scoped to the open workspace; dropped whenever the workspace changes.
    pub analytics: AnalyticsCache,
}
