//! Session lifecycle, in two halves.
//!
//! The durable half is [`SessionTracker`]: `state.json` maps each username
//! to its last login time, and a session counts as valid while less than
//! ten minutes have passed since then. The window is fixed at login; page
//! activity never extends it.
//!
//! The volatile half is [`SessionRegistry`]: an in-process map from opaque
//! session tokens (carried in a cookie) to usernames. It answers "who is
//! this request from"; whether that user's session is still open is always
//! the tracker's call. Tokens are created at login and dropped at logout or
//! when expiry is detected.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::saving;

const STATE_FILE: &str = "state.json";

/// Minutes a login remains valid.
pub const SESSION_WINDOW_MINUTES: i64 = 10;

/// One user's entry in the session file. Timestamps are local wall-clock
/// time, serialized as ISO-8601 without an offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub last_login: NaiveDateTime,
}

/// Handle on the session file inside the data directory.
pub struct SessionTracker {
    path: PathBuf,
}

impl SessionTracker {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        SessionTracker {
            path: data_dir.as_ref().join(STATE_FILE),
        }
    }

    /// Load the full session mapping; a missing file is an empty mapping.
    pub fn load(&self) -> Result<BTreeMap<String, SessionEntry>> {
        let Some(contents) = saving::read_if_exists(&self.path)? else {
            return Ok(BTreeMap::new());
        };

        serde_json::from_str(&contents).map_err(|source| AppError::MalformedJson {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn save(&self, state: &BTreeMap<String, SessionEntry>) -> Result<()> {
        let json = serde_json::to_string_pretty(state).map_err(|source| {
            AppError::MalformedJson {
                path: self.path.display().to_string(),
                source,
            }
        })?;
        saving::write_atomic(&self.path, &json)
    }

    /// Record a login for `username` at the current time.
    ///
    /// Called exactly once per successful login. Any previous entry for the
    /// username is overwritten (most recent login wins); entries for other
    /// users are carried along untouched, expired or not.
    pub fn touch(&self, username: &str) -> Result<()> {
        self.touch_at(username, Local::now().naive_local())
    }

    /// [`touch`](Self::touch) with an explicit timestamp.
    pub fn touch_at(&self, username: &str, now: NaiveDateTime) -> Result<()> {
        let mut state = self.load()?;
        state.insert(username.to_string(), SessionEntry { last_login: now });
        self.save(&state)?;
        debug!(user = username, "session touched");
        Ok(())
    }

    /// Is `username`'s session window still open?
    ///
    /// True iff the username has an entry and less than
    /// [`SESSION_WINDOW_MINUTES`] have passed since its last login. An
    /// absent username is simply false.
    pub fn is_valid(&self, username: &str) -> Result<bool> {
        self.is_valid_at(username, Local::now().naive_local())
    }

    /// [`is_valid`](Self::is_valid) with an explicit notion of "now".
    pub fn is_valid_at(&self, username: &str, now: NaiveDateTime) -> Result<bool> {
        let state = self.load()?;
        Ok(state
            .get(username)
            .is_some_and(|entry| now - entry.last_login < Duration::minutes(SESSION_WINDOW_MINUTES)))
    }
}

/// In-memory map from session tokens to usernames.
///
/// Tokens are random UUIDs handed to the browser in the `session` cookie.
/// The registry is process-local and never persisted: restart the process
/// and everyone is logged out.
pub struct SessionRegistry {
    tokens: RwLock<HashMap<String, String>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a fresh token for `username` and return it.
    pub fn create(&self, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens
            .write()
            .unwrap()
            .insert(token.clone(), username.to_string());
        token
    }

    /// Resolve a token to the username it was minted for, if any.
    pub fn resolve(&self, token: &str) -> Option<String> {
        self.tokens.read().unwrap().get(token).cloned()
    }

    /// Forget a token (logout, or expiry detected).
    pub fn remove(&self, token: &str) {
        self.tokens.write().unwrap().remove(token);
    }
}
