// Declared messages — messages this process already handled and announced
//
// Prevents handling the same message twice locally. It does not stop a
// peer from receiving the same declaration more than once.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct DeclaredMessages {
    groups: RwLock<HashMap<i64, HashSet<i64>>>,
}

impl DeclaredMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `mid` in `gid` as declared. Returns false if it already was.
    pub fn declare(&self, gid: i64, mid: i64) -> bool {
        self.groups.write().entry(gid).or_default().insert(mid)
    }

    pub fn is_declared(&self, gid: i64, mid: i64) -> bool {
        self.groups
            .read()
            .get(&gid)
            .map(|mids| mids.contains(&mid))
            .unwrap_or(false)
    }

    /// Forget a group's declarations, returning how many were dropped
    pub fn clear_group(&self, gid: i64) -> usize {
        self.groups
            .write()
            .remove(&gid)
            .map(|mids| mids.len())
            .unwrap_or(0)
    }

    /// Total declared messages across groups
    pub fn len(&self) -> usize {
        self.groups.read().values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_declare_once() {
        let declared = DeclaredMessages::new();
        assert!(declared.declare(-100, 5));
        assert!(!declared.declare(-100, 5));
        assert!(declared.is_declared(-100, 5));
        assert!(!declared.is_declared(-200, 5));
    }

    #[test]
    fn test_clear_group() {
        let declared = DeclaredMessages::new();
        declared.declare(-100, 1);
        declared.declare(-100, 2);
        declared.declare(-200, 1);

        assert_eq!(declared.clear_group(-100), 2);
        assert_eq!(declared.len(), 1);
    }

    #[test]
    fn test_concurrent_declarations() {
        let declared = Arc::new(DeclaredMessages::new());
        let handles: Vec<_> = (0..8)
            .map(|gid| {
                let declared = declared.clone();
                std::thread::spawn(move || {
                    for mid in 0..100 {
                        declared.declare(gid, mid);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(declared.len(), 800);
    }
}
