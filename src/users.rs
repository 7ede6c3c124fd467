//! Credential store: username → password/role/hall, kept in `users.json`.
//!
//! The whole mapping is loaded and rewritten on every access. Passwords are
//! stored and compared as plain text; see the crate docs before deploying
//! this anywhere that matters.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::saving;

const USERS_FILE: &str = "users.json";

/// Credentials synthesized on first run so the application is reachable.
pub const DEFAULT_ADMIN_USER: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "1234";
pub const DEFAULT_ADMIN_HALL: &str = "A";

/// Access tier: admins get full CRUD plus user management, users are
/// read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
        }
    }
}

/// Everything stored about one user. The username is the map key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub password: String,
    pub role: Role,
    pub hall: String,
}

/// The credential file's contents: username → user info.
pub type UserMap = BTreeMap<String, UserInfo>;

/// Handle on the credential file inside the data directory.
pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        UserStore {
            path: data_dir.as_ref().join(USERS_FILE),
        }
    }

    /// Load the full user mapping.
    ///
    /// A missing file is an empty mapping, never an error. A file that
    /// exists but does not parse is fatal to the caller.
    pub fn load(&self) -> Result<UserMap> {
        let Some(contents) = saving::read_if_exists(&self.path)? else {
            return Ok(UserMap::new());
        };

        serde_json::from_str(&contents).map_err(|source| AppError::MalformedJson {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Overwrite the credential file with `users`, pretty-printed.
    pub fn save(&self, users: &UserMap) -> Result<()> {
        let json = serde_json::to_string_pretty(users).map_err(|source| {
            AppError::MalformedJson {
                path: self.path.display().to_string(),
                source,
            }
        })?;

        saving::write_atomic(&self.path, &json)?;
        debug!(path = %self.path.display(), count = users.len(), "saved users");
        Ok(())
    }

    /// Insert the default `admin` account if no `admin` key exists yet.
    ///
    /// Idempotent: an existing `admin` entry is left untouched, whatever
    /// its current password, role, or hall. Runs once at process start.
    pub fn ensure_default_admin(&self) -> Result<()> {
        let mut users = self.load()?;
        if users.contains_key(DEFAULT_ADMIN_USER) {
            return Ok(());
        }

        users.insert(
            DEFAULT_ADMIN_USER.to_string(),
            UserInfo {
                password: DEFAULT_ADMIN_PASSWORD.to_string(),
                role: Role::Admin,
                hall: DEFAULT_ADMIN_HALL.to_string(),
            },
        );
        self.save(&users)?;
        info!("created default admin account");
        Ok(())
    }

    /// Check a username/password pair against the stored credentials.
    ///
    /// True iff the username exists and the stored password equals the
    /// given one by plain case-sensitive string comparison.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let users = self.load()?;
        Ok(users
            .get(username)
            .is_some_and(|info| info.password == password))
    }

    /// Add a new user.
    ///
    /// Returns `Ok(false)` without writing anything when the username is
    /// already taken; `Ok(true)` once the new mapping is saved.
    pub fn add_user(&self, username: &str, info: UserInfo) -> Result<bool> {
        let mut users = self.load()?;
        if users.contains_key(username) {
            return Ok(false);
        }

        users.insert(username.to_string(), info);
        self.save(&users)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn load_missing_file_is_empty() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn load_malformed_file_fails() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("users.json"), "not json").unwrap();

        assert!(matches!(
            store.load(),
            Err(AppError::MalformedJson { .. })
        ));
    }

    #[test]
    fn authenticate_unknown_user_is_false() {
        let (_dir, store) = store();
        store.ensure_default_admin().unwrap();

        assert!(!store.authenticate("nobody", "anything").unwrap());
    }

    #[test]
    fn authenticate_is_exact_string_match() {
        let (_dir, store) = store();
        store.ensure_default_admin().unwrap();

        assert!(store.authenticate("admin", "1234").unwrap());
        assert!(!store.authenticate("admin", "12345").unwrap());
        assert!(!store.authenticate("admin", "1234 ").unwrap());
        assert!(!store.authenticate("Admin", "1234").unwrap());
    }

    #[test]
    fn ensure_default_admin_is_idempotent() {
        let (_dir, store) = store();
        store.ensure_default_admin().unwrap();
        store.ensure_default_admin().unwrap();

        let users = store.load().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users["admin"].password, "1234");
        assert_eq!(users["admin"].role, Role::Admin);
        assert_eq!(users["admin"].hall, "A");
    }

    #[test]
    fn ensure_default_admin_never_alters_an_existing_entry() {
        let (_dir, store) = store();
        let mut users = UserMap::new();
        users.insert(
            "admin".to_string(),
            UserInfo {
                password: "changed".to_string(),
                role: Role::Admin,
                hall: "B".to_string(),
            },
        );
        store.save(&users).unwrap();

        store.ensure_default_admin().unwrap();
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded["admin"].password, "changed");
        assert_eq!(reloaded["admin"].hall, "B");
    }

    #[test]
    fn add_user_rejects_duplicates_without_writing() {
        let (_dir, store) = store();
        store.ensure_default_admin().unwrap();

        let added = store
            .add_user(
                "worker",
                UserInfo {
                    password: "pw".to_string(),
                    role: Role::User,
                    hall: "B".to_string(),
                },
            )
            .unwrap();
        assert!(added);

        let again = store
            .add_user(
                "worker",
                UserInfo {
                    password: "other".to_string(),
                    role: Role::Admin,
                    hall: "A".to_string(),
                },
            )
            .unwrap();
        assert!(!again);

        let users = store.load().unwrap();
        assert_eq!(users["worker"].password, "pw");
        assert_eq!(users["worker"].role, Role::User);
    }

    #[test]
    fn save_is_pretty_printed_json() {
        let (dir, store) = store();
        store.ensure_default_admin().unwrap();

        let raw = std::fs::read_to_string(dir.path().join("users.json")).unwrap();
        assert!(raw.contains('\n'));
        assert!(raw.contains("\"password\": \"1234\""));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }
}
