use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted set of interned `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Series carry at most a handful of tags (step name, class, error kind).
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a tag set, sorting by key. Later duplicates of a key are dropped.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = pairs.into_iter().collect();
        tags.sort_by_key(|(k, _)| *k);
        tags.dedup_by_key(|(k, _)| *k);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let idx = self.tags.partition_point(|(k, _)| *k < key);
        self.tags
            .get(idx)
            .and_then(|(k, v)| (*k == key).then_some(*v))
    }

    /// True when every pair of `other` is present here.
    pub fn is_superset_of(&self, other: &TagSet) -> bool {
        other.iter().all(|(k, v)| self.get(k) == Some(v))
    }

    /// Keeps only the given keys (used for grouping query results).
    pub fn project(&self, keys: &[KeyId]) -> TagSet {
        let tags = keys
            .iter()
            .filter_map(|k| self.get(*k).map(|v| (*k, v)))
            .collect::<SmallVec<[(KeyId, KeyId); 4]>>();
        TagSet::from_pairs(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(v: u32) -> KeyId {
        KeyId::from(v)
    }

    #[test]
    fn from_pairs_sorts_and_dedups_keys() {
        let set = TagSet::from_pairs([(k(3), k(1)), (k(1), k(2)), (k(3), k(9))]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(k(1)), Some(k(2)));
        assert_eq!(set.get(k(3)), Some(k(1)));
        assert_eq!(set.get(k(2)), None);
    }

    #[test]
    fn superset_and_project() {
        let full = TagSet::from_pairs([(k(1), k(10)), (k(2), k(20))]);
        let part = TagSet::from_pairs([(k(2), k(20))]);
        assert!(full.is_superset_of(&part));
        assert!(!part.is_superset_of(&full));
        assert!(full.is_superset_of(&TagSet::default()));
        assert_eq!(full.project(&[k(2), k(5)]), part);
    }
}
