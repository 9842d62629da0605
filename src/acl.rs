//! Access control policies: an owner plus a list of grants.
//!
//! Policies round-trip through two forms: the S3 XML document
//! (`AccessControlPolicy`) exchanged on the wire, and a JSON encoding
//! stored as the `acl` attribute on buckets and objects. Both decode to
//! the same logical policy.

use crate::iam::perm::{
    PERM_FULL_CONTROL, PERM_READ, PERM_READ_ACP, PERM_WRITE, PERM_WRITE_ACP,
};
use serde::{Deserialize, Serialize};

pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Who a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grantee {
    CanonicalUser { id: String, display_name: String },
    AllUsers,
    AuthenticatedUsers,
}

const URI_ALL_USERS: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
const URI_AUTHENTICATED: &str = "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// A single grant: grantee plus a permission mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: u32,
}

/// Owner + grants. The owner appears in every serialized form; the
/// default (private) policy grants the owner FULL_CONTROL and nothing
/// else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPolicy {
    pub owner_id: String,
    pub owner_display_name: String,
    pub grants: Vec<Grant>,
}

impl AclPolicy {
    /// The default policy: owner gets FULL_CONTROL.
    pub fn private(owner_id: &str, display_name: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            owner_display_name: display_name.to_string(),
            grants: vec![Grant {
                grantee: Grantee::CanonicalUser {
                    id: owner_id.to_string(),
                    display_name: display_name.to_string(),
                },
                permission: PERM_FULL_CONTROL,
            }],
        }
    }

    /// Build a policy from a canned ACL name. Unknown names are rejected.
    pub fn canned(owner_id: &str, display_name: &str, name: &str) -> Option<Self> {
        let mut policy = Self::private(owner_id, display_name);
        match name {
            "" | "private" => {}
            "public-read" => policy.grants.push(Grant {
                grantee: Grantee::AllUsers,
                permission: PERM_READ,
            }),
            "public-read-write" => policy.grants.push(Grant {
                grantee: Grantee::AllUsers,
                permission: PERM_READ | PERM_WRITE,
            }),
            "authenticated-read" => policy.grants.push(Grant {
                grantee: Grantee::AuthenticatedUsers,
                permission: PERM_READ,
            }),
            _ => return None,
        }
        Some(policy)
    }

    /// Aggregate permission mask for a caller. `uid` of `None` means the
    /// anonymous user (AllUsers grants only); any authenticated caller
    /// also collects AuthenticatedUsers grants.
    pub fn get_perm(&self, uid: Option<&str>) -> u32 {
        let mut mask = 0;
        for grant in &self.grants {
            let applies = match &grant.grantee {
                Grantee::CanonicalUser { id, .. } => uid == Some(id.as_str()),
                Grantee::AllUsers => true,
                Grantee::AuthenticatedUsers => uid.is_some(),
            };
            if applies {
                mask |= grant.permission;
            }
        }
        mask
    }

    /// Check whether a session may perform an operation needing `needed`
    /// bits. The effective permission is the ACL grant intersected with
    /// the session's own mask (subuser keys carry a reduced mask).
    pub fn verify(&self, uid: Option<&str>, session_mask: u32, needed: u32) -> bool {
        self.get_perm(uid) & session_mask & needed == needed
    }

    /// Encode to the attribute form stored on the backend.
    pub fn encode(&self) -> Vec<u8> {
        // serde_json cannot fail on this shape
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode the attribute form.
    pub fn decode(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }

    /// Serialize as the S3 `AccessControlPolicy` XML document. Each
    /// permission bit becomes its own `<Grant>` element.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<AccessControlPolicy xmlns="{}">"#, S3_XMLNS));
        xml.push('\n');
        xml.push_str("  <Owner>\n");
        xml.push_str(&format!("    <ID>{}</ID>\n", escape(&self.owner_id)));
        xml.push_str(&format!(
            "    <DisplayName>{}</DisplayName>\n",
            escape(&self.owner_display_name)
        ));
        xml.push_str("  </Owner>\n");
        xml.push_str("  <AccessControlList>\n");
        for grant in &self.grants {
            // widest name first, so FULL_CONTROL renders as one grant
            for (bit, name) in PERM_XML_NAMES {
                if grant.permission & bit == *bit {
                    xml.push_str("    <Grant>\n");
                    match &grant.grantee {
                        Grantee::CanonicalUser { id, display_name } => {
                            xml.push_str(
                                "      <Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"CanonicalUser\">\n",
                            );
                            xml.push_str(&format!("        <ID>{}</ID>\n", escape(id)));
                            xml.push_str(&format!(
                                "        <DisplayName>{}</DisplayName>\n",
                                escape(display_name)
                            ));
                            xml.push_str("      </Grantee>\n");
                        }
                        Grantee::AllUsers => {
                            xml.push_str(
                                "      <Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"Group\">\n",
                            );
                            xml.push_str(&format!("        <URI>{}</URI>\n", URI_ALL_USERS));
                            xml.push_str("      </Grantee>\n");
                        }
                        Grantee::AuthenticatedUsers => {
                            xml.push_str(
                                "      <Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"Group\">\n",
                            );
                            xml.push_str(&format!("        <URI>{}</URI>\n", URI_AUTHENTICATED));
                            xml.push_str("      </Grantee>\n");
                        }
                    }
                    xml.push_str(&format!("      <Permission>{}</Permission>\n", name));
                    xml.push_str("    </Grant>\n");
                    if *bit == PERM_FULL_CONTROL {
                        break;
                    }
                }
            }
        }
        xml.push_str("  </AccessControlList>\n");
        xml.push_str("</AccessControlPolicy>");
        xml
    }

    /// Parse the S3 XML document form.
    pub fn from_xml(xml: &str) -> Result<Self, String> {
        let doc: AccessControlPolicyXml =
            quick_xml::de::from_str(xml).map_err(|e| e.to_string())?;
        let mut grants = Vec::new();
        for g in doc.access_control_list.grants {
            let permission = perm_from_xml_name(&g.permission)
                .ok_or_else(|| format!("unknown permission: {}", g.permission))?;
            let grantee = if let Some(uri) = g.grantee.uri {
                match uri.as_str() {
                    URI_ALL_USERS => Grantee::AllUsers,
                    URI_AUTHENTICATED => Grantee::AuthenticatedUsers,
                    other => return Err(format!("unknown grantee group: {}", other)),
                }
            } else if let Some(id) = g.grantee.id {
                Grantee::CanonicalUser {
                    id,
                    display_name: g.grantee.display_name.unwrap_or_default(),
                }
            } else {
                return Err("grantee has neither ID nor URI".to_string());
            };
            grants.push(Grant { grantee, permission });
        }
        Ok(Self {
            owner_id: doc.owner.id,
            owner_display_name: doc.owner.display_name.unwrap_or_default(),
            grants,
        })
    }
}

const PERM_XML_NAMES: &[(u32, &str)] = &[
    (PERM_FULL_CONTROL, "FULL_CONTROL"),
    (PERM_READ, "READ"),
    (PERM_WRITE, "WRITE"),
    (PERM_READ_ACP, "READ_ACP"),
    (PERM_WRITE_ACP, "WRITE_ACP"),
];

fn perm_from_xml_name(name: &str) -> Option<u32> {
    match name {
        "FULL_CONTROL" => Some(PERM_FULL_CONTROL),
        "READ" => Some(PERM_READ),
        "WRITE" => Some(PERM_WRITE),
        "READ_ACP" => Some(PERM_READ_ACP),
        "WRITE_ACP" => Some(PERM_WRITE_ACP),
        _ => None,
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

// Wire shapes for parsing; the xsi:type attribute is ignored and the
// grantee kind is inferred from which child elements are present.

#[derive(Debug, Deserialize)]
struct AccessControlPolicyXml {
    #[serde(rename = "Owner")]
    owner: OwnerXml,
    #[serde(rename = "AccessControlList")]
    access_control_list: AccessControlListXml,
}

#[derive(Debug, Deserialize)]
struct OwnerXml {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "DisplayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessControlListXml {
    #[serde(rename = "Grant", default)]
    grants: Vec<GrantXml>,
}

#[derive(Debug, Deserialize)]
struct GrantXml {
    #[serde(rename = "Grantee")]
    grantee: GranteeXml,
    #[serde(rename = "Permission")]
    permission: String,
}

#[derive(Debug, Deserialize)]
struct GranteeXml {
    #[serde(rename = "ID")]
    id: Option<String>,
    #[serde(rename = "DisplayName")]
    display_name: Option<String>,
    #[serde(rename = "URI")]
    uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_policy_grants_owner_full_control() {
        let policy = AclPolicy::private("alice", "Alice");
        assert_eq!(policy.get_perm(Some("alice")), PERM_FULL_CONTROL);
        assert_eq!(policy.get_perm(Some("bob")), 0);
        assert_eq!(policy.get_perm(None), 0);
    }

    #[test]
    fn test_canned_public_read() {
        let policy = AclPolicy::canned("alice", "Alice", "public-read").unwrap();
        assert_eq!(policy.get_perm(None), PERM_READ);
        assert_eq!(policy.get_perm(Some("bob")), PERM_READ);
        assert_eq!(policy.get_perm(Some("alice")), PERM_FULL_CONTROL);
    }

    #[test]
    fn test_canned_authenticated_read() {
        let policy = AclPolicy::canned("alice", "Alice", "authenticated-read").unwrap();
        assert_eq!(policy.get_perm(None), 0);
        assert_eq!(policy.get_perm(Some("bob")), PERM_READ);
    }

    #[test]
    fn test_canned_unknown_rejected() {
        assert!(AclPolicy::canned("alice", "Alice", "log-delivery-write").is_none());
    }

    #[test]
    fn test_verify_intersects_session_mask() {
        let policy = AclPolicy::private("alice", "Alice");
        // a read-only subuser session cannot write even as the owner
        assert!(policy.verify(Some("alice"), PERM_READ, PERM_READ));
        assert!(!policy.verify(Some("alice"), PERM_READ, PERM_WRITE));
        assert!(policy.verify(Some("alice"), PERM_FULL_CONTROL, PERM_WRITE));
    }

    #[test]
    fn test_attr_round_trip() {
        let policy = AclPolicy::canned("alice", "Alice", "public-read").unwrap();
        let encoded = policy.encode();
        let decoded = AclPolicy::decode(&encoded).unwrap();
        assert_eq!(policy, decoded);
    }

    #[test]
    fn test_xml_round_trip() {
        let policy = AclPolicy::canned("alice", "Alice", "public-read").unwrap();
        let xml = policy.to_xml();
        let parsed = AclPolicy::from_xml(&xml).unwrap();
        assert_eq!(policy, parsed);
    }

    #[test]
    fn test_xml_round_trip_matches_attr_form() {
        let policy = AclPolicy::canned("alice", "Alice", "authenticated-read").unwrap();
        let via_xml = AclPolicy::from_xml(&policy.to_xml()).unwrap();
        let via_attr = AclPolicy::decode(&policy.encode()).unwrap();
        assert_eq!(via_xml, via_attr);
    }

    #[test]
    fn test_parse_handwritten_xml() {
        let xml = r#"<AccessControlPolicy>
            <Owner><ID>alice</ID><DisplayName>Alice</DisplayName></Owner>
            <AccessControlList>
              <Grant>
                <Grantee><ID>bob</ID><DisplayName>Bob</DisplayName></Grantee>
                <Permission>READ</Permission>
              </Grant>
            </AccessControlList>
          </AccessControlPolicy>"#;
        let policy = AclPolicy::from_xml(xml).unwrap();
        assert_eq!(policy.owner_id, "alice");
        assert_eq!(policy.get_perm(Some("bob")), PERM_READ);
    }

    #[test]
    fn test_parse_rejects_bad_permission() {
        let xml = r#"<AccessControlPolicy>
            <Owner><ID>alice</ID></Owner>
            <AccessControlList>
              <Grant>
                <Grantee><ID>bob</ID></Grantee>
                <Permission>SUPERUSER</Permission>
              </Grant>
            </AccessControlList>
          </AccessControlPolicy>"#;
        assert!(AclPolicy::from_xml(xml).is_err());
    }
}
