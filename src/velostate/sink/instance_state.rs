use std::borrow::Borrow;
use std::collections::hash_map::{self, HashMap};
use std::hash::Hash;

/// Latest known state per instance key of one input partition.
///
/// Built once by recovery and handed to processing as read-only context. Keys whose last
/// state record was a tombstone are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState<K, S>
where
    K: Eq + Hash,
{
    entries: HashMap<K, S>,
}

impl<K, S> InstanceState<K, S>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&S>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, K, S> {
        self.entries.iter()
    }

    pub fn into_inner(self) -> HashMap<K, S> {
        self.entries
    }

    /// Fold one state record: a value replaces the key's state, `None` removes the key
    pub(crate) fn apply(&mut self, key: K, state: Option<S>) {
        match state {
            Some(state) => {
                self.entries.insert(key, state);
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }
}

impl<K, S> Default for InstanceState<K, S>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> FromIterator<(K, S)> for InstanceState<K, S>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, S)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a, K, S> IntoIterator for &'a InstanceState<K, S>
where
    K: Eq + Hash,
{
    type Item = (&'a K, &'a S);
    type IntoIter = hash_map::Iter<'a, K, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
