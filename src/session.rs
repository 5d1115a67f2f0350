//! Saved authentication state injected into every fresh browsing context.
//!
//! The file format is the `storageState` JSON written by the interactive
//! login flow: an object with a `cookies` array. Other keys are ignored.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to read session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse session file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix seconds; `-1` or absent for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

impl SavedSession {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads the session if possible. Fetches proceed unauthenticated otherwise.
    pub fn load_optional(path: &Path) -> Option<Self> {
        match Self::load(path) {
            Ok(session) => {
                info!(cookies = session.cookies.len(), path = %path.display(), "Loaded saved session");
                Some(session)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load session, continuing unauthenticated");
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}
