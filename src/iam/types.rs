//! User, subuser, and access key records.

use crate::iam::caps::CapSet;
use crate::iam::perm::perm_to_str;
use crate::fmt::Formatter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ACCESS_KEY_ID_LEN: usize = 20;
pub const SECRET_KEY_LEN: usize = 40;

/// Which protocol a key authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    S3,
    Swift,
}

/// An access key. S3 keys carry a 20-char id and a 40-char secret;
/// Swift keys carry only a secret and are addressed as `uid:subuser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subuser: Option<String>,
    #[serde(default)]
    pub key_type: KeyType,
}

/// A named subuser with a permission mask over the parent's resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subuser {
    pub name: String,
    pub perm_mask: u32,
}

/// A user account: the unit of ownership for buckets and keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default = "default_max_buckets")]
    pub max_buckets: i32,
    #[serde(default)]
    pub subusers: BTreeMap<String, Subuser>,
    #[serde(default)]
    pub access_keys: BTreeMap<String, AccessKey>,
    #[serde(default)]
    pub swift_keys: BTreeMap<String, AccessKey>,
    #[serde(default)]
    pub caps: CapSet,
}

fn default_max_buckets() -> i32 {
    1000
}

impl User {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            email: None,
            suspended: false,
            max_buckets: default_max_buckets(),
            subusers: BTreeMap::new(),
            access_keys: BTreeMap::new(),
            swift_keys: BTreeMap::new(),
            caps: CapSet::new(),
        }
    }

    /// Find a key by id across both key maps.
    pub fn find_key(&self, key_id: &str) -> Option<&AccessKey> {
        self.access_keys
            .get(key_id)
            .or_else(|| self.swift_keys.get(key_id))
    }

    /// Dump the full record for admin rendering.
    pub fn dump(&self, f: &mut dyn Formatter) {
        f.open_object_section("user_info");
        f.dump_string("user_id", &self.user_id);
        f.dump_string("display_name", &self.display_name);
        f.dump_string("email", self.email.as_deref().unwrap_or(""));
        f.dump_int("suspended", i64::from(self.suspended));
        f.dump_int("max_buckets", i64::from(self.max_buckets));

        f.open_array_section("subusers");
        for sub in self.subusers.values() {
            f.open_object_section("user");
            f.dump_string("id", &format!("{}:{}", self.user_id, sub.name));
            f.dump_string("permissions", &perm_to_str(sub.perm_mask));
            f.close_section();
        }
        f.close_section();

        f.open_array_section("keys");
        for key in self.access_keys.values() {
            f.open_object_section("key");
            f.dump_string("user", &key_owner(&self.user_id, key));
            f.dump_string("access_key", &key.id);
            f.dump_string("secret_key", &key.secret);
            f.close_section();
        }
        f.close_section();

        f.open_array_section("swift_keys");
        for key in self.swift_keys.values() {
            f.open_object_section("key");
            f.dump_string("user", &key_owner(&self.user_id, key));
            f.dump_string("secret_key", &key.secret);
            f.close_section();
        }
        f.close_section();

        self.caps.dump(f);
        f.close_section();
    }
}

fn key_owner(user_id: &str, key: &AccessKey) -> String {
    match &key.subuser {
        Some(sub) => format!("{}:{}", user_id, sub),
        None => user_id.to_string(),
    }
}

/// Generate a random S3 access key id: 20 uppercase alphanumerics.
pub fn gen_access_key_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..ACCESS_KEY_ID_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate a random secret key: 40 chars from the base64 alphabet.
pub fn gen_secret_key() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut rng = rand::thread_rng();
    (0..SECRET_KEY_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt::{into_string, JsonFormatter};
    use crate::iam::perm::PERM_FULL_CONTROL;

    #[test]
    fn test_gen_access_key_id() {
        let id = gen_access_key_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_gen_secret_key() {
        let secret = gen_secret_key();
        assert_eq!(secret.len(), 40);
    }

    #[test]
    fn test_find_key_covers_both_maps() {
        let mut user = User::new("alice", "Alice");
        user.access_keys.insert(
            "AK1".to_string(),
            AccessKey {
                id: "AK1".to_string(),
                secret: "s1".to_string(),
                subuser: None,
                key_type: KeyType::S3,
            },
        );
        user.swift_keys.insert(
            "alice:swift".to_string(),
            AccessKey {
                id: "alice:swift".to_string(),
                secret: "s2".to_string(),
                subuser: Some("swift".to_string()),
                key_type: KeyType::Swift,
            },
        );
        assert!(user.find_key("AK1").is_some());
        assert!(user.find_key("alice:swift").is_some());
        assert!(user.find_key("nope").is_none());
    }

    #[test]
    fn test_dump_renders_subuser_permissions() {
        let mut user = User::new("alice", "Alice");
        user.subusers.insert(
            "readonly".to_string(),
            Subuser {
                name: "readonly".to_string(),
                perm_mask: PERM_FULL_CONTROL,
            },
        );
        let mut f = JsonFormatter::new(false);
        user.dump(&mut f);
        let out = into_string(&mut f);
        assert!(out.contains(r#""id":"alice:readonly""#));
        assert!(out.contains(r#""permissions":"full-control""#));
    }

    #[test]
    fn test_user_serde_round_trip() {
        let mut user = User::new("bob", "Bob");
        user.email = Some("bob@example.com".to_string());
        user.caps = CapSet::parse("buckets=read").unwrap();
        let json = serde_json::to_string(&user).unwrap();
        let back: User = serde_json::from_str(&json).unwrap();
        assert_eq!(user, back);
    }
}
