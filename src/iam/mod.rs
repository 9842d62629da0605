//! Identity store: users, subusers, access keys, admin capabilities.

pub mod caps;
pub mod perm;
pub mod store;
pub mod types;

pub use caps::CapSet;
pub use perm::{parse_access, perm_to_str, PERM_FULL_CONTROL, PERM_READ, PERM_READ_ACP, PERM_WRITE, PERM_WRITE_ACP};
pub use store::{AdminError, UserAdminRequest, UserDb};
pub use types::{AccessKey, KeyType, Subuser, User};
