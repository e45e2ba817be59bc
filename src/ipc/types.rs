use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use super::error::err;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Sidecar session: the selected workspace and its open database.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    /// The open workspace connection, or a ready-made `no_workspace` response.
    pub fn conn_or_err(&self, id: &str) -> Result<&Connection, serde_json::Value> {
        self.db
            .as_ref()
            .ok_or_else(|| err(id, "no_workspace", "select a workspace first", None))
    }
}
