use std::collections::HashMap;

use crate::node::InodeRecord;

/// Most recently loaded record for each inode number. Entries are dropped
/// explicitly whenever the inode is written or freed; the cache never aliases
/// a record somebody else may still be mutating.
#[derive(Debug, Default)]
pub struct InodeCache {
    nodes: HashMap<u32, InodeRecord>,
    hits: u64,
    misses: u64,
}

impl InodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, ino: u32) -> Option<InodeRecord> {
        match self.nodes.get(&ino) {
            Some(node) => {
                self.hits += 1;
                Some(*node)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, ino: u32, node: InodeRecord) {
        self.nodes.insert(ino, node);
    }

    pub fn invalidate(&mut self, ino: u32) {
        if self.nodes.remove(&ino).is_some() {
            trace!("dropped cached inode {}", ino);
        }
    }

    pub fn contains(&self, ino: u32) -> bool {
        self.nodes.contains_key(&ino)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// (hits, misses) since the cache was created.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FileType;

    #[test]
    fn returns_what_was_inserted_until_invalidated() {
        let mut cache = InodeCache::new();
        let node = InodeRecord::new(FileType::Regular, 0o600);

        assert_eq!(cache.get(4), None);
        cache.insert(4, node);
        assert_eq!(cache.get(4), Some(node));
        assert_eq!(cache.stats(), (1, 1));

        cache.invalidate(4);
        assert!(!cache.contains(4));
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_replaces_stale_copy() {
        let mut cache = InodeCache::new();
        let mut node = InodeRecord::root();
        cache.insert(1, node);
        node.size = 64;
        cache.insert(1, node);
        assert_eq!(cache.get(1).map(|n| n.size), Some(64));
        assert_eq!(cache.len(), 1);
    }
}
