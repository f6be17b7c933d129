//! API user storage.
//!
//! Users hold an opaque key (stored as a sha256 digest) and a role. An
//! empty store mints an `admin` user on init and surfaces the plaintext key
//! exactly once.

use std::sync::Arc;

use redb::{Database, ReadableTable};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::stacks::map_err;
use crate::tables::USERS;
use crate::types::{User, UserRole};

/// Storage and checks for API users.
pub trait UserStorage: Send + Sync {
    fn save_user(&self, user: User) -> StateResult<()>;

    fn get_user(&self, name: &str) -> StateResult<User>;

    /// True when `key` is the user's current key.
    fn check_key(&self, name: &str, key: &str) -> StateResult<bool>;

    fn is_admin(&self, name: &str) -> StateResult<bool>;

    /// Create a user and return its plaintext key.
    fn create_user(&self, name: &str, role: UserRole) -> StateResult<String>;

    /// Replace a user's key and return the new plaintext.
    fn refresh_token(&self, name: &str) -> StateResult<String>;
}

fn digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── redb backend ───────────────────────────────────────────────

/// User store backed by redb.
#[derive(Clone)]
pub struct RedbUserStore {
    db: Arc<Database>,
}

impl RedbUserStore {
    /// Wrap a shared database. When the user table is empty an `admin`
    /// user is created and its plaintext key returned.
    pub fn new(db: Arc<Database>) -> StateResult<(Self, Option<String>)> {
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;

        let store = Self { db };
        let admin_key = if store.is_empty()? {
            let key = store.create_user("admin", UserRole::Admin)?;
            info!("bootstrapped admin user");
            Some(key)
        } else {
            None
        };

        Ok((store, admin_key))
    }

    fn is_empty(&self) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        let mut iter = table.iter().map_err(map_err!(Read))?;
        let result = iter.next().is_none();
        Ok(result)
    }

    fn read(&self, name: &str) -> StateResult<Option<User>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            )),
            None => Ok(None),
        }
    }
}

impl UserStorage for RedbUserStore {
    fn save_user(&self, user: User) -> StateResult<()> {
        let value = serde_json::to_vec(&user).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(USERS).map_err(map_err!(Table))?;
            table
                .insert(user.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_user(&self, name: &str) -> StateResult<User> {
        self.read(name)?
            .ok_or_else(|| StateError::UserMissing(name.to_string()))
    }

    fn check_key(&self, name: &str, key: &str) -> StateResult<bool> {
        let user = self.get_user(name)?;
        Ok(user.key == digest(key))
    }

    fn is_admin(&self, name: &str) -> StateResult<bool> {
        Ok(self.get_user(name)?.role == UserRole::Admin)
    }

    fn create_user(&self, name: &str, role: UserRole) -> StateResult<String> {
        if self.read(name)?.is_some() {
            return Err(StateError::UserExists(name.to_string()));
        }

        let key = Uuid::new_v4().to_string();
        self.save_user(User {
            name: name.to_string(),
            key: digest(&key),
            role,
        })?;

        Ok(key)
    }

    fn refresh_token(&self, name: &str) -> StateResult<String> {
        let mut user = self.get_user(name)?;
        let key = Uuid::new_v4().to_string();
        user.key = digest(&key);
        self.save_user(user)?;
        Ok(key)
    }
}

// ── dev-mode backend ───────────────────────────────────────────

/// User store for dev mode: every key checks out, everyone is an admin.
#[derive(Default)]
pub struct NoopUserStore;

impl UserStorage for NoopUserStore {
    fn save_user(&self, _user: User) -> StateResult<()> {
        Ok(())
    }

    fn get_user(&self, name: &str) -> StateResult<User> {
        Ok(User {
            name: name.to_string(),
            key: String::new(),
            role: UserRole::Admin,
        })
    }

    fn check_key(&self, _name: &str, _key: &str) -> StateResult<bool> {
        Ok(true)
    }

    fn is_admin(&self, _name: &str) -> StateResult<bool> {
        Ok(true)
    }

    fn create_user(&self, _name: &str, _role: UserRole) -> StateResult<String> {
        Ok(Uuid::new_v4().to_string())
    }

    fn refresh_token(&self, _name: &str) -> StateResult<String> {
        Ok(Uuid::new_v4().to_string())
    }
}
