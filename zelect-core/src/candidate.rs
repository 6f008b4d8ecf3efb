//! # Candidates and sibling ranking
//!
//! Extraction of order keys from node names and ranking of the sibling set
//! observed under an election path.

use crate::{ElectionError, OrderKey, Result, PROTECTED_PREFIX};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name prefix for unprotected candidate nodes.
pub const CANDIDATE_PREFIX: &str = "n_";

/// Extracts the order key from a node name or full node path.
///
/// The key is the run of decimal digits at the very end of the final path
/// segment. Only candidate names carry one: the digits must follow either
/// `n_` or a protected `_c_<guid>-` prefix, so a foreign child such as
/// `worker2` is rejected. The digits are parsed into a `u64` and a value
/// that does not fit is rejected rather than truncated.
///
/// # Examples
///
/// ```rust
/// use zelect_core::{parse_order_key, OrderKey};
///
/// let key = parse_order_key("/election/_c_1b4e28ba-2fa1-11d2-883f-0016d3cca427-0000000042").unwrap();
/// assert_eq!(key, OrderKey::new(42));
/// assert!(parse_order_key("lock").is_err());
/// assert!(parse_order_key("worker2").is_err());
/// ```
pub fn parse_order_key(name: &str) -> Result<OrderKey> {
    let segment = name.rsplit('/').next().unwrap_or(name);
    let digits_start = segment
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(index, _)| index);

    let Some(start) = digits_start else {
        return Err(ElectionError::invalid_candidate(
            name,
            "no sequence suffix",
        ));
    };

    if !is_candidate_decoration(&segment[..start]) {
        return Err(ElectionError::invalid_candidate(
            name,
            "not a candidate node name",
        ));
    }

    segment[start..].parse::<OrderKey>().map_err(|e| {
        ElectionError::invalid_candidate(name, format!("sequence suffix out of range: {}", e))
    })
}

fn is_candidate_decoration(decoration: &str) -> bool {
    if decoration == CANDIDATE_PREFIX {
        return true;
    }
    decoration
        .strip_prefix(PROTECTED_PREFIX)
        .and_then(|rest| rest.strip_suffix('-'))
        .is_some_and(|guid| Uuid::parse_str(guid).is_ok())
}

/// This process's registration at the election path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Full node path as assigned by the service
    pub global_id: String,
    /// Final path segment, as it appears in child listings
    pub name: String,
    pub order_key: OrderKey,
}

impl Candidate {
    pub fn from_global_id(global_id: impl Into<String>) -> Result<Self> {
        let global_id = global_id.into();
        let name = global_id
            .rsplit('/')
            .next()
            .unwrap_or(global_id.as_str())
            .to_string();
        let order_key = parse_order_key(&name)?;

        Ok(Self {
            global_id,
            name,
            order_key,
        })
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (key {})", self.global_id, self.order_key)
    }
}

/// One ranked child of the election path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub name: String,
    pub order_key: OrderKey,
}

/// Freshly fetched child set, ordered by ascending key.
#[derive(Debug, Clone, Default)]
pub struct SiblingSet {
    ranked: Vec<Sibling>,
    ignored: Vec<String>,
}

impl SiblingSet {
    /// Ranks a child listing.
    ///
    /// Children without an order key are set aside. Two children sharing a
    /// key mean the service handed out the same sequence number twice.
    pub fn from_children<S: AsRef<str>>(children: &[S]) -> Result<Self> {
        let mut ranked = Vec::with_capacity(children.len());
        let mut ignored = Vec::new();

        for child in children {
            let name = child.as_ref();
            match parse_order_key(name) {
                Ok(order_key) => ranked.push(Sibling {
                    name: name.to_string(),
                    order_key,
                }),
                Err(_) => ignored.push(name.to_string()),
            }
        }

        ranked.sort_by_key(|sibling| sibling.order_key);

        if let Some(pair) = ranked
            .windows(2)
            .find(|pair| pair[0].order_key == pair[1].order_key)
        {
            return Err(ElectionError::protocol_violation(format!(
                "siblings {} and {} share order key {}",
                pair[0].name, pair[1].name, pair[0].order_key
            )));
        }

        Ok(Self { ranked, ignored })
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// Children that were not recognised as candidates.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn minimum(&self) -> Option<&Sibling> {
        self.ranked.first()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ranked.iter().any(|sibling| sibling.name == name)
    }

    /// The sibling ranked immediately ahead of `candidate`, if any.
    pub fn predecessor_of(&self, candidate: &Candidate) -> Option<&Sibling> {
        self.ranked
            .iter()
            .take_while(|sibling| sibling.order_key < candidate.order_key)
            .last()
    }

    /// Fails if `candidate` is missing from the set while its session is live.
    pub fn ensure_member(&self, candidate: &Candidate) -> Result<()> {
        if self.contains(&candidate.name) {
            Ok(())
        } else {
            Err(ElectionError::protocol_violation(format!(
                "own node {} is absent from the fetched child list",
                candidate.name
            )))
        }
    }

    /// True when `candidate` holds the smallest key in the set.
    pub fn is_leader(&self, candidate: &Candidate) -> bool {
        self.minimum()
            .is_some_and(|minimum| candidate.order_key <= minimum.order_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sibling> {
        self.ranked.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(keys: &[u64]) -> Vec<String> {
        keys.iter().map(|key| format!("n_{:010}", key)).collect()
    }

    #[test]
    fn test_parse_order_key_strips_decoration() {
        assert_eq!(parse_order_key("n_0000000123").unwrap(), OrderKey::new(123));
        assert_eq!(
            parse_order_key("_c_8d2c1f4e-ab55-4e3b-9c44-7f2a1e0b9d61-0000000009").unwrap(),
            OrderKey::new(9)
        );
        assert_eq!(
            parse_order_key("/election/n_0000000011").unwrap(),
            OrderKey::new(11)
        );
    }

    #[test]
    fn test_parse_order_key_rejects_missing_suffix() {
        let err = parse_order_key("/election/leader").unwrap_err();
        assert!(matches!(err, ElectionError::InvalidCandidateName { .. }));
        assert!(parse_order_key("/election/").is_err());
    }

    #[test]
    fn test_parse_order_key_rejects_foreign_shapes() {
        for name in [
            "worker2",
            "0000000007",
            "x_0000000007",
            "n_worker0000000007",
            "_c_not-a-guid-0000000007",
            "_c_8d2c1f4e-ab55-4e3b-9c44-7f2a1e0b9d61_0000000007",
        ] {
            let err = parse_order_key(name).unwrap_err();
            assert!(
                matches!(err, ElectionError::InvalidCandidateName { .. }),
                "{} was accepted",
                name
            );
        }
    }

    #[test]
    fn test_parse_order_key_does_not_truncate() {
        // Would wrap in a 16-bit parse.
        assert_eq!(parse_order_key("n_0000070000").unwrap(), OrderKey::new(70_000));
        assert_eq!(
            parse_order_key("n_4294967296").unwrap(),
            OrderKey::new(4_294_967_296)
        );
        assert!(parse_order_key("n_99999999999999999999").is_err());
    }

    #[test]
    fn test_candidate_from_global_id() {
        let candidate = Candidate::from_global_id("/election/n_0000000005").unwrap();
        assert_eq!(candidate.name, "n_0000000005");
        assert_eq!(candidate.order_key, OrderKey::new(5));
    }

    #[test]
    fn test_sibling_set_ranks_and_detects_leader() {
        let set = SiblingSet::from_children(&names(&[7, 5, 6])).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.minimum().unwrap().order_key, OrderKey::new(5));

        let five = Candidate::from_global_id("/election/n_0000000005").unwrap();
        let seven = Candidate::from_global_id("/election/n_0000000007").unwrap();
        assert!(set.is_leader(&five));
        assert!(!set.is_leader(&seven));
        assert_eq!(set.predecessor_of(&seven).unwrap().order_key, OrderKey::new(6));
        assert!(set.predecessor_of(&five).is_none());
    }

    #[test]
    fn test_sibling_set_duplicate_keys_are_violation() {
        let children = vec![
            "n_0000000003".to_string(),
            "_c_8d2c1f4e-ab55-4e3b-9c44-7f2a1e0b9d61-0000000003".to_string(),
        ];
        let err = SiblingSet::from_children(&children).unwrap_err();
        assert!(matches!(err, ElectionError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_sibling_set_ignores_foreign_children() {
        let children = vec![
            "lock".to_string(),
            "worker2".to_string(),
            "n_0000000002".to_string(),
        ];
        let set = SiblingSet::from_children(&children).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.ignored(), ["lock".to_string(), "worker2".to_string()]);

        let me = Candidate::from_global_id("/election/n_0000000002").unwrap();
        assert!(set.is_leader(&me));
    }

    #[test]
    fn test_ensure_member() {
        let set = SiblingSet::from_children(&names(&[1, 2])).unwrap();
        let absent = Candidate::from_global_id("/election/n_0000000003").unwrap();
        assert!(matches!(
            set.ensure_member(&absent),
            Err(ElectionError::ProtocolViolation { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_parse_recovers_any_u64(key in any::<u64>(), guid in "[a-f0-9]{8}-[a-f0-9]{4}-4[a-f0-9]{3}-[89ab][a-f0-9]{3}-[a-f0-9]{12}") {
            let name = format!("_c_{}-{:010}", guid, key);
            prop_assert_eq!(parse_order_key(&name).unwrap(), OrderKey::new(key));
        }

        #[test]
        fn prop_minimum_is_smallest_key(keys in proptest::collection::btree_set(any::<u64>(), 1..64)) {
            let keys: Vec<u64> = keys.into_iter().collect();
            let set = SiblingSet::from_children(&names(&keys)).unwrap();
            let smallest = *keys.iter().min().unwrap();
            prop_assert_eq!(set.minimum().unwrap().order_key, OrderKey::new(smallest));
            let leaders = keys
                .iter()
                .filter(|key| {
                    let candidate = Candidate::from_global_id(format!("/election/n_{:010}", key)).unwrap();
                    set.is_leader(&candidate)
                })
                .count();
            prop_assert_eq!(leaders, 1);
        }
    }
}
