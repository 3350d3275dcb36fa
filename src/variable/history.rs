use std::collections::HashSet;

/// Topologically ordered record of the operations leading to a variable.
///
/// Entries are keyed by the address of the node they wrap, so merging the histories of two
/// operands that share ancestors keeps a single copy of each ancestor.
#[derive(Clone)]
pub(crate) struct History<T>
where
    T: Clone,
{
    seen: HashSet<usize>,
    path: Vec<(usize, T)>,
}

impl<T> History<T>
where
    T: Clone,
{
    /// Appends `entry` unless an entry with the same `id` is already recorded.
    pub(crate) fn insert(&mut self, id: usize, entry: T) {
        if self.seen.insert(id) {
            self.path.push((id, entry));
        }
    }

    /// Appends the entries of `other` that are not already part of `self`, preserving their
    /// relative order.
    pub(crate) fn merge(&mut self, other: Self) {
        for (id, entry) in other.path {
            self.insert(id, entry);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.path.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Iterates over the entries from the oldest to the most recent.
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.path.iter().map(|(_, entry)| entry)
    }

    /// Iterates, oldest first, over the entries that are not recorded in `other`.
    pub(crate) fn iter_beyond<'a, U>(&'a self, other: &'a History<U>) -> impl Iterator<Item = &'a T>
    where
        U: Clone,
    {
        self.path
            .iter()
            .filter(move |(id, _)| !other.seen.contains(id))
            .map(|(_, entry)| entry)
    }
}

impl<T> Default for History<T>
where
    T: Clone,
{
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
            path: Vec::new(),
        }
    }
}
