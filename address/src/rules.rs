use std::sync::Arc;

/// An immutable, sorted set of rule identifiers.
///
/// Compiled address nodes share their rule sets by reference count;
/// `union` always allocates a fresh set, so a cut piece never needs to
/// mutate a set another node still points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleSet(Arc<[u32]>);

impl Default for RuleSet {
    fn default() -> Self {
        Self(Vec::new().into())
    }
}

impl RuleSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A set holding a single rule id.
    pub fn single(id: u32) -> Self {
        Self(vec![id].into())
    }

    /// Builds a set from arbitrary ids, sorting and deduplicating.
    pub fn from_ids(ids: &[u32]) -> Self {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Self(ids.into())
    }

    /// The union of two sets.
    pub fn union(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut merged = Vec::with_capacity(self.0.len() + other.0.len());
        let (mut left, mut right) = (self.0.iter().peekable(), other.0.iter().peekable());
        while let (Some(&&l), Some(&&r)) = (left.peek(), right.peek()) {
            match l.cmp(&r) {
                std::cmp::Ordering::Less => {
                    merged.push(l);
                    left.next();
                }
                std::cmp::Ordering::Greater => {
                    merged.push(r);
                    right.next();
                }
                std::cmp::Ordering::Equal => {
                    merged.push(l);
                    left.next();
                    right.next();
                }
            }
        }
        merged.extend(left.copied());
        merged.extend(right.copied());
        Self(merged.into())
    }

    /// Whether the set holds the given id.
    pub fn contains(&self, id: u32) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// The ids, ascending.
    pub fn ids(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
