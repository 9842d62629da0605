//! The user database.
//!
//! Users are kept in one map with two secondary indices: access-key id
//! (covering both S3 and Swift key maps) and email. Every mutation
//! validates against the indices before touching the maps, so a failed
//! operation leaves all three structures untouched; the single write lock
//! makes the multi-index update atomic and serializes writers per store.
//!
//! State persists as a JSON file rewritten after each mutation; the
//! indices are rebuilt on load.

use crate::iam::caps::CapSet;
use crate::iam::types::{
    gen_access_key_id, gen_secret_key, AccessKey, KeyType, Subuser, User,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Admin operation failures, tagged by kind.
#[derive(Debug, Clone, Error)]
pub enum AdminError {
    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("email already in use: {0}")]
    EmailExists(String),

    #[error("access key already exists: {0}")]
    KeyExists(String),

    #[error("access key not found: {0}")]
    KeyNotFound(String),

    #[error("subuser already exists: {0}")]
    SubuserExists(String),

    #[error("subuser not found: {0}")]
    SubuserNotFound(String),

    #[error("user is not empty: {0}")]
    NotEmpty(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store io error: {0}")]
    Io(String),
}

/// Flag bag shared by all identity admin operations; each op reads the
/// fields it needs and ignores the rest.
#[derive(Debug, Clone, Default)]
pub struct UserAdminRequest {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_key: Option<String>,
    pub gen_access_key: bool,
    pub gen_secret: bool,
    pub key_type: KeyType,
    pub subuser: Option<String>,
    pub perm_mask: Option<u32>,
    pub purge_keys: bool,
    pub max_buckets: Option<i32>,
    pub suspended: Option<bool>,
    pub caps: Option<String>,
}

#[derive(Default)]
struct Db {
    users: BTreeMap<String, User>,
    // access-key id -> user_id, covering both key maps
    key_index: HashMap<String, String>,
    // email -> user_id
    email_index: HashMap<String, String>,
}

impl Db {
    fn rebuild_indices(&mut self) {
        self.key_index.clear();
        self.email_index.clear();
        for user in self.users.values() {
            for id in user.access_keys.keys().chain(user.swift_keys.keys()) {
                self.key_index.insert(id.clone(), user.user_id.clone());
            }
            if let Some(email) = &user.email {
                self.email_index.insert(email.clone(), user.user_id.clone());
            }
        }
    }

    fn index_user_keys(&mut self, user: &User) {
        for id in user.access_keys.keys().chain(user.swift_keys.keys()) {
            self.key_index.insert(id.clone(), user.user_id.clone());
        }
    }

    fn unindex_user(&mut self, user: &User) {
        for id in user.access_keys.keys().chain(user.swift_keys.keys()) {
            self.key_index.remove(id);
        }
        if let Some(email) = &user.email {
            self.email_index.remove(email);
        }
    }
}

/// Thread-safe user store with optional file persistence.
pub struct UserDb {
    inner: RwLock<Db>,
    path: Option<PathBuf>,
}

impl UserDb {
    /// In-memory store (tests, ephemeral deployments).
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Db::default()),
            path: None,
        }
    }

    /// Open a store backed by a JSON file; missing file means empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AdminError> {
        let path = path.as_ref().to_path_buf();
        let mut db = Db::default();
        match std::fs::read(&path) {
            Ok(data) => {
                db.users = serde_json::from_slice(&data)
                    .map_err(|e| AdminError::Io(format!("parsing {}: {}", path.display(), e)))?;
                db.rebuild_indices();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AdminError::Io(e.to_string())),
        }
        debug!("Loaded {} users from {}", db.users.len(), path.display());
        Ok(Self {
            inner: RwLock::new(db),
            path: Some(path),
        })
    }

    fn persist(&self, db: &Db) -> Result<(), AdminError> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AdminError::Io(e.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(&db.users)
            .map_err(|e| AdminError::Io(e.to_string()))?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| AdminError::Io(e.to_string()))?;
        std::io::Write::write_all(&mut tmp.as_file(), &data)
            .map_err(|e| AdminError::Io(e.to_string()))?;
        tmp.persist(path)
            .map_err(|e| AdminError::Io(e.error.to_string()))?;
        Ok(())
    }

    // === lookups ===

    pub fn info(&self, user_id: &str) -> Result<User, AdminError> {
        self.inner
            .read()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))
    }

    pub fn list_user_ids(&self) -> Vec<String> {
        self.inner.read().users.keys().cloned().collect()
    }

    /// Resolve an access-key id to its owner and key record.
    pub fn lookup_by_access_key(&self, key_id: &str) -> Option<(User, AccessKey)> {
        let db = self.inner.read();
        let uid = db.key_index.get(key_id)?;
        let user = db.users.get(uid)?;
        let key = user.find_key(key_id)?.clone();
        Some((user.clone(), key))
    }

    pub fn lookup_by_email(&self, email: &str) -> Option<User> {
        let db = self.inner.read();
        let uid = db.email_index.get(email)?;
        db.users.get(uid).cloned()
    }

    // === user ops ===

    /// Create a user. A default S3 key pair is generated when the request
    /// supplies neither key material nor generation flags.
    pub fn add_user(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;
        let display_name = required(&req.display_name, "display name")?;

        let mut db = self.inner.write();
        if db.users.contains_key(user_id) {
            return Err(AdminError::UserExists(user_id.to_string()));
        }
        if let Some(email) = &req.email {
            if db.email_index.contains_key(email) {
                return Err(AdminError::EmailExists(email.clone()));
            }
        }

        let key = build_key(req, user_id, true)?;
        if db.key_index.contains_key(&key.id) {
            return Err(AdminError::KeyExists(key.id.clone()));
        }

        let mut user = User::new(user_id, display_name);
        user.email = req.email.clone();
        if let Some(max) = req.max_buckets {
            user.max_buckets = max;
        }
        if let Some(caps) = &req.caps {
            user.caps = CapSet::parse(caps).map_err(AdminError::InvalidArgument)?;
        }
        match key.key_type {
            KeyType::S3 => user.access_keys.insert(key.id.clone(), key),
            KeyType::Swift => user.swift_keys.insert(key.id.clone(), key),
        };

        db.index_user_keys(&user);
        if let Some(email) = &user.email {
            db.email_index.insert(email.clone(), user.user_id.clone());
        }
        db.users.insert(user.user_id.clone(), user.clone());
        self.persist(&db)?;
        Ok(user)
    }

    /// Mutate display name, email, max-buckets, or the suspension flag.
    pub fn modify_user(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;

        let mut db = self.inner.write();
        if let Some(email) = &req.email {
            if let Some(owner) = db.email_index.get(email) {
                if owner != user_id {
                    return Err(AdminError::EmailExists(email.clone()));
                }
            }
        }
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;

        if let Some(name) = &req.display_name {
            user.display_name = name.clone();
        }
        let old_email = user.email.clone();
        if let Some(email) = &req.email {
            user.email = Some(email.clone());
        }
        if let Some(max) = req.max_buckets {
            user.max_buckets = max;
        }
        if let Some(suspended) = req.suspended {
            user.suspended = suspended;
        }
        let updated = user.clone();

        if updated.email != old_email {
            if let Some(old) = &old_email {
                db.email_index.remove(old);
            }
            if let Some(new) = &updated.email {
                db.email_index.insert(new.clone(), user_id.to_string());
            }
        }
        self.persist(&db)?;
        Ok(updated)
    }

    /// Remove a user and drop its entries from every index.
    /// `owns_buckets` comes from the caller's bucket-list check; a user
    /// that still owns buckets cannot be removed without the purge flag.
    pub fn remove_user(&self, user_id: &str, owns_buckets: bool, purge: bool) -> Result<(), AdminError> {
        if owns_buckets && !purge {
            return Err(AdminError::NotEmpty(user_id.to_string()));
        }
        let mut db = self.inner.write();
        let user = db
            .users
            .remove(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        db.unindex_user(&user);
        self.persist(&db)?;
        Ok(())
    }

    // === subuser ops ===

    pub fn add_subuser(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;
        let name = required(&req.subuser, "subuser name")?;

        let mut db = self.inner.write();
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        if user.subusers.contains_key(name) {
            return Err(AdminError::SubuserExists(name.to_string()));
        }
        user.subusers.insert(
            name.to_string(),
            Subuser {
                name: name.to_string(),
                perm_mask: req.perm_mask.unwrap_or(0),
            },
        );
        let updated = user.clone();
        self.persist(&db)?;
        Ok(updated)
    }

    pub fn modify_subuser(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;
        let name = required(&req.subuser, "subuser name")?;

        let mut db = self.inner.write();
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        let sub = user
            .subusers
            .get_mut(name)
            .ok_or_else(|| AdminError::SubuserNotFound(name.to_string()))?;
        if let Some(mask) = req.perm_mask {
            sub.perm_mask = mask;
        }
        let updated = user.clone();
        self.persist(&db)?;
        Ok(updated)
    }

    /// Remove a subuser; with `purge_keys` any key bound to it goes too.
    pub fn remove_subuser(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;
        let name = required(&req.subuser, "subuser name")?;

        let mut db = self.inner.write();
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        if user.subusers.remove(name).is_none() {
            return Err(AdminError::SubuserNotFound(name.to_string()));
        }
        let mut removed_keys = Vec::new();
        if req.purge_keys {
            for map in [&mut user.access_keys, &mut user.swift_keys] {
                map.retain(|id, key| {
                    let keep = key.subuser.as_deref() != Some(name);
                    if !keep {
                        removed_keys.push(id.clone());
                    }
                    keep
                });
            }
        }
        let updated = user.clone();
        for id in removed_keys {
            db.key_index.remove(&id);
        }
        self.persist(&db)?;
        Ok(updated)
    }

    // === key ops ===

    pub fn add_key(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;

        let mut db = self.inner.write();
        let key = build_key(req, user_id, false)?;
        if db.key_index.contains_key(&key.id) {
            return Err(AdminError::KeyExists(key.id.clone()));
        }
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        if let Some(sub) = &key.subuser {
            if !user.subusers.contains_key(sub) {
                return Err(AdminError::SubuserNotFound(sub.clone()));
            }
        }
        let key_id = key.id.clone();
        match key.key_type {
            KeyType::S3 => user.access_keys.insert(key_id.clone(), key),
            KeyType::Swift => user.swift_keys.insert(key_id.clone(), key),
        };
        let updated = user.clone();
        db.key_index.insert(key_id, user_id.to_string());
        self.persist(&db)?;
        Ok(updated)
    }

    pub fn remove_key(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;
        let key_id = required(&req.access_key_id, "access key")?;

        let mut db = self.inner.write();
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        let removed = user.access_keys.remove(key_id).is_some()
            || user.swift_keys.remove(key_id).is_some();
        if !removed {
            return Err(AdminError::KeyNotFound(key_id.to_string()));
        }
        let updated = user.clone();
        db.key_index.remove(key_id);
        self.persist(&db)?;
        Ok(updated)
    }

    // === caps ops ===

    pub fn add_caps(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;
        let caps_str = required(&req.caps, "caps")?;
        let caps = CapSet::parse(caps_str).map_err(AdminError::InvalidArgument)?;

        let mut db = self.inner.write();
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        user.caps.add(&caps);
        let updated = user.clone();
        self.persist(&db)?;
        Ok(updated)
    }

    pub fn remove_caps(&self, req: &UserAdminRequest) -> Result<User, AdminError> {
        let user_id = required(&req.user_id, "user id")?;
        let caps_str = required(&req.caps, "caps")?;
        let caps = CapSet::parse(caps_str).map_err(AdminError::InvalidArgument)?;

        let mut db = self.inner.write();
        let user = db
            .users
            .get_mut(user_id)
            .ok_or_else(|| AdminError::UserNotFound(user_id.to_string()))?;
        user.caps.remove(&caps);
        let updated = user.clone();
        self.persist(&db)?;
        Ok(updated)
    }
}

impl Default for UserDb {
    fn default() -> Self {
        Self::new()
    }
}

fn required<'a>(field: &'a Option<String>, what: &str) -> Result<&'a str, AdminError> {
    field
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdminError::InvalidArgument(format!("{} was not specified", what)))
}

/// Resolve key material for add operations. `default_s3` drives the
/// user-create behavior: emit an S3 pair even when nothing was requested.
fn build_key(
    req: &UserAdminRequest,
    user_id: &str,
    default_s3: bool,
) -> Result<AccessKey, AdminError> {
    let key_type = req.key_type;
    match key_type {
        KeyType::S3 => {
            let id = match &req.access_key_id {
                Some(id) if !id.is_empty() => id.clone(),
                _ => {
                    if !default_s3 && !req.gen_access_key && req.secret_key.is_none() && !req.gen_secret {
                        return Err(AdminError::InvalidArgument(
                            "access key or generation flag required".to_string(),
                        ));
                    }
                    gen_access_key_id()
                }
            };
            let secret = match &req.secret_key {
                Some(s) if !s.is_empty() => s.clone(),
                _ => gen_secret_key(),
            };
            Ok(AccessKey {
                id,
                secret,
                subuser: req.subuser.clone(),
                key_type,
            })
        }
        KeyType::Swift => {
            let sub = required(&req.subuser, "subuser (swift keys)")?;
            let secret = match &req.secret_key {
                Some(s) if !s.is_empty() => s.clone(),
                _ => gen_secret_key(),
            };
            Ok(AccessKey {
                id: format!("{}:{}", user_id, sub),
                secret,
                subuser: Some(sub.to_string()),
                key_type,
            })
        }
    }
}
