//! Admin API capabilities.
//!
//! A capability grants a user access to a slice of the admin REST surface,
//! e.g. `buckets=read` lets the caller hit the read-only bucket endpoints.
//! The textual form accepted from `--caps` is
//! `"resource=perm[,perm][; resource=perm...]"`.

use crate::fmt::Formatter;
use crate::iam::perm::{PERM_READ, PERM_WRITE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Admin resources a capability can name.
const CAP_RESOURCES: &[&str] = &["users", "buckets", "metadata", "usage", "zone"];

/// Set of `(resource, perm)` capability grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapSet {
    caps: BTreeMap<String, u32>,
}

impl CapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Parse the textual caps form. Unknown resources and empty
    /// permission lists are rejected.
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut set = Self::new();
        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (resource, perms) = part
                .split_once('=')
                .ok_or_else(|| format!("could not parse caps: {}", part))?;
            let resource = resource.trim();
            if !CAP_RESOURCES.contains(&resource) {
                return Err(format!("unknown cap resource: {}", resource));
            }
            let mut mask = 0u32;
            for perm in perms.split(',') {
                match perm.trim() {
                    "read" => mask |= PERM_READ,
                    "write" => mask |= PERM_WRITE,
                    "*" | "readwrite" => mask |= PERM_READ | PERM_WRITE,
                    other => return Err(format!("unknown cap permission: {}", other)),
                }
            }
            if mask == 0 {
                return Err(format!("empty permission list for: {}", resource));
            }
            *set.caps.entry(resource.to_string()).or_insert(0) |= mask;
        }
        Ok(set)
    }

    /// Union another set into this one.
    pub fn add(&mut self, other: &CapSet) {
        for (resource, mask) in &other.caps {
            *self.caps.entry(resource.clone()).or_insert(0) |= mask;
        }
    }

    /// Subtract another set; resources left with no bits are dropped.
    pub fn remove(&mut self, other: &CapSet) {
        for (resource, mask) in &other.caps {
            if let Some(cur) = self.caps.get_mut(resource) {
                *cur &= !mask;
                if *cur == 0 {
                    self.caps.remove(resource);
                }
            }
        }
    }

    /// True when the set grants every bit of `perm` on `resource`.
    pub fn check_cap(&self, resource: &str, perm: u32) -> bool {
        self.caps
            .get(resource)
            .map(|m| m & perm == perm)
            .unwrap_or(false)
    }

    pub fn dump(&self, f: &mut dyn Formatter) {
        f.open_array_section("caps");
        for (resource, mask) in &self.caps {
            f.open_object_section("cap");
            f.dump_string("type", resource);
            f.dump_string("perm", &cap_perm_str(*mask));
            f.close_section();
        }
        f.close_section();
    }
}

fn cap_perm_str(mask: u32) -> String {
    match (mask & PERM_READ != 0, mask & PERM_WRITE != 0) {
        (true, true) => "*".to_string(),
        (true, false) => "read".to_string(),
        (false, true) => "write".to_string(),
        (false, false) => "<none>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single() {
        let caps = CapSet::parse("buckets=read").unwrap();
        assert!(caps.check_cap("buckets", PERM_READ));
        assert!(!caps.check_cap("buckets", PERM_WRITE));
        assert!(!caps.check_cap("users", PERM_READ));
    }

    #[test]
    fn test_parse_multi() {
        let caps = CapSet::parse("usage=read, write; users=read").unwrap();
        assert!(caps.check_cap("usage", PERM_READ | PERM_WRITE));
        assert!(caps.check_cap("users", PERM_READ));
    }

    #[test]
    fn test_parse_star() {
        let caps = CapSet::parse("buckets=*").unwrap();
        assert!(caps.check_cap("buckets", PERM_READ | PERM_WRITE));
    }

    #[test]
    fn test_parse_rejects_unknown_resource() {
        assert!(CapSet::parse("pets=read").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_perm() {
        assert!(CapSet::parse("buckets=admin").is_err());
    }

    #[test]
    fn test_add_and_remove() {
        let mut caps = CapSet::parse("buckets=read").unwrap();
        caps.add(&CapSet::parse("buckets=write; usage=read").unwrap());
        assert!(caps.check_cap("buckets", PERM_READ | PERM_WRITE));
        assert!(caps.check_cap("usage", PERM_READ));

        caps.remove(&CapSet::parse("buckets=read").unwrap());
        assert!(!caps.check_cap("buckets", PERM_READ));
        assert!(caps.check_cap("buckets", PERM_WRITE));

        caps.remove(&CapSet::parse("buckets=write; usage=read").unwrap());
        assert!(caps.is_empty());
    }

    #[test]
    fn test_check_requires_all_bits() {
        let caps = CapSet::parse("buckets=read").unwrap();
        assert!(!caps.check_cap("buckets", PERM_READ | PERM_WRITE));
    }
}
