//! Permission bitmask shared by subusers, ACL grants, and session masks.

pub const PERM_READ: u32 = 0x01;
pub const PERM_WRITE: u32 = 0x02;
pub const PERM_READ_ACP: u32 = 0x04;
pub const PERM_WRITE_ACP: u32 = 0x08;
pub const PERM_FULL_CONTROL: u32 = PERM_READ | PERM_WRITE | PERM_READ_ACP | PERM_WRITE_ACP;

/// Parse the `--access` flag: one of read, write, readwrite, full.
pub fn parse_access(s: &str) -> Option<u32> {
    match s.to_ascii_lowercase().as_str() {
        "read" => Some(PERM_READ),
        "write" => Some(PERM_WRITE),
        "readwrite" => Some(PERM_READ | PERM_WRITE),
        "full" => Some(PERM_FULL_CONTROL),
        _ => None,
    }
}

/// Greedy match table, widest mask first.
const PERM_NAMES: &[(u32, &str)] = &[
    (PERM_FULL_CONTROL, "full-control"),
    (PERM_READ | PERM_WRITE, "read-write"),
    (PERM_READ, "read"),
    (PERM_WRITE, "write"),
    (PERM_READ_ACP, "read-acp"),
    (PERM_WRITE_ACP, "write-acp"),
];

/// Render a permission mask for admin output, greedily consuming the
/// widest matching masks: `full-control`, `read-write, read-acp`, etc.
pub fn perm_to_str(mask: u32) -> String {
    if mask == 0 {
        return "<none>".to_string();
    }
    let mut mask = mask;
    let mut parts = Vec::new();
    while mask != 0 {
        let before = mask;
        for &(bits, name) in PERM_NAMES {
            if mask & bits == bits {
                parts.push(name);
                mask &= !bits;
                if mask == 0 {
                    break;
                }
            }
        }
        if mask == before {
            break;
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_access() {
        assert_eq!(parse_access("read"), Some(PERM_READ));
        assert_eq!(parse_access("write"), Some(PERM_WRITE));
        assert_eq!(parse_access("readwrite"), Some(PERM_READ | PERM_WRITE));
        assert_eq!(parse_access("full"), Some(PERM_FULL_CONTROL));
        assert_eq!(parse_access("FULL"), Some(PERM_FULL_CONTROL));
        assert_eq!(parse_access("owner"), None);
    }

    #[test]
    fn test_perm_to_str_greedy() {
        assert_eq!(perm_to_str(PERM_FULL_CONTROL), "full-control");
        assert_eq!(perm_to_str(PERM_READ | PERM_WRITE), "read-write");
        assert_eq!(perm_to_str(PERM_READ), "read");
        assert_eq!(perm_to_str(PERM_WRITE), "write");
        assert_eq!(perm_to_str(PERM_READ_ACP), "read-acp");
        assert_eq!(perm_to_str(PERM_WRITE_ACP), "write-acp");
        assert_eq!(
            perm_to_str(PERM_READ | PERM_WRITE | PERM_READ_ACP),
            "read-write, read-acp"
        );
        assert_eq!(perm_to_str(0), "<none>");
    }
}
