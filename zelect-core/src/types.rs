//! # Core Types
//!
//! Fundamental types shared by the registrar, the election engine and the
//! coordination-service implementations.

use crate::CoordinationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a coordination-service session.
///
/// Ephemeral nodes belong to exactly one session and disappear with it.
///
/// # Examples
///
/// ```rust
/// use zelect_core::SessionId;
///
/// let session = SessionId::new();
/// assert_ne!(session, SessionId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a candidate in the election order.
///
/// Keys come from the service's per-path sequence counter and are compared
/// numerically. They are held as a full `u64`; ZooKeeper itself formats the
/// counter as a signed 32-bit value, so any real deployment stays far inside
/// this range, but nothing here narrows it.
///
/// # Examples
///
/// ```rust
/// use zelect_core::OrderKey;
///
/// let first = OrderKey::new(5);
/// let second = OrderKey::new(6);
/// assert!(first < second);
/// assert_eq!("0000000005".parse::<OrderKey>().unwrap(), first);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey(pub u64);

impl OrderKey {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderKey {
    type Err = std::num::ParseIntError;

    fn from_str(digits: &str) -> std::result::Result<Self, Self::Err> {
        digits.parse::<u64>().map(Self)
    }
}

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// Permission bits carried by an [`Acl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(u32);

impl Permissions {
    pub const READ: Permissions = Permissions(1);
    pub const WRITE: Permissions = Permissions(1 << 1);
    pub const CREATE: Permissions = Permissions(1 << 2);
    pub const DELETE: Permissions = Permissions(1 << 3);
    pub const ADMIN: Permissions = Permissions(1 << 4);
    pub const ALL: Permissions = Permissions(0x1f);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

/// Access-control entry attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub permissions: Permissions,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    /// Everyone may do everything.
    pub fn world_all() -> Vec<Acl> {
        vec![Acl {
            permissions: Permissions::ALL,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }]
    }

    /// Everyone may read and list, nobody may create children.
    pub fn world_read() -> Vec<Acl> {
        vec![Acl {
            permissions: Permissions::READ,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }]
    }

    /// Whether any world entry in `acl` grants `wanted`.
    pub fn world_allows(acl: &[Acl], wanted: Permissions) -> bool {
        acl.iter()
            .any(|entry| entry.scheme == "world" && entry.permissions.contains(wanted))
    }
}

/// Validated absolute node path under which candidates register.
///
/// # Examples
///
/// ```rust
/// use zelect_core::ElectionPath;
///
/// let path = ElectionPath::new("/services/election").unwrap();
/// assert_eq!(path.child("n_0000000001"), "/services/election/n_0000000001");
/// assert_eq!(path.ancestors(), vec!["/services", "/services/election"]);
/// assert!(ElectionPath::new("election/").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElectionPath(String);

impl ElectionPath {
    pub fn new(path: impl Into<String>) -> std::result::Result<Self, CoordinationError> {
        let path = path.into();
        validate_path(&path)?;
        if path == "/" {
            return Err(CoordinationError::invalid_path(
                path,
                "the root cannot host an election",
            ));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full path of a child node called `name`.
    pub fn child(&self, name: &str) -> String {
        format!("{}/{}", self.0, name)
    }

    /// Every path from the first component down to this one, root-first.
    pub fn ancestors(&self) -> Vec<String> {
        let mut current = String::new();
        self.0
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                current.push('/');
                current.push_str(segment);
                current.clone()
            })
            .collect()
    }
}

impl fmt::Display for ElectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ElectionPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Checks that `path` is absolute, has no empty or relative segments and no
/// trailing separator (except for the root itself).
pub fn validate_path(path: &str) -> std::result::Result<(), CoordinationError> {
    if !path.starts_with('/') {
        return Err(CoordinationError::invalid_path(path, "path must be absolute"));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(CoordinationError::invalid_path(
            path,
            "path must not end with a separator",
        ));
    }
    if path.contains('\0') {
        return Err(CoordinationError::invalid_path(path, "path contains NUL"));
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(CoordinationError::invalid_path(path, "empty path segment")),
            "." | ".." => {
                return Err(CoordinationError::invalid_path(path, "relative path segment"))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Splits an absolute path into its parent path and final name.
///
/// Returns `None` for the root.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let index = path.rfind('/')?;
    let name = &path[index + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if index == 0 { "/" } else { &path[..index] };
    Some((parent, name))
}

/// Milliseconds since the Unix epoch, saturating to zero on a skewed clock.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/election"), Some(("/", "election")));
        assert_eq!(split_path("/a/b/c"), Some(("/a/b", "c")));
        assert_eq!(split_path("/"), None);
    }

    #[test]
    fn test_validate_path_rejects_malformed() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a//b").is_err());
        assert!(validate_path("/a/../b").is_err());
        assert!(validate_path("/a/").is_err());
    }

    #[test]
    fn test_election_path_rejects_root() {
        assert!(ElectionPath::new("/").is_err());
        let path = ElectionPath::new("/election").unwrap();
        assert_eq!(path.ancestors(), vec!["/election".to_string()]);
    }

    #[test]
    fn test_permissions() {
        let read_create = Permissions::READ | Permissions::CREATE;
        assert!(read_create.contains(Permissions::READ));
        assert!(!read_create.contains(Permissions::DELETE));
        assert!(Acl::world_allows(&Acl::world_all(), Permissions::CREATE));
        assert!(!Acl::world_allows(&Acl::world_read(), Permissions::CREATE));
    }

    #[test]
    fn test_order_key_is_wider_than_32_bits() {
        let wide: OrderKey = "9223372036854775807".parse().unwrap();
        assert_eq!(wide.value(), i64::MAX as u64);
        assert!("18446744073709551616".parse::<OrderKey>().is_err());
    }
}
