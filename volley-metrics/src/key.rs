use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Interned string id used for metric names, tag keys and tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<KeyId> for u32 {
    fn from(v: KeyId) -> Self {
        v.0
    }
}

#[derive(Debug, Default)]
struct InternerState {
    ids: AHashMap<Arc<str>, KeyId>,
    names: Vec<Arc<str>>,
}

#[derive(Debug, Default)]
pub struct Interner {
    state: RwLock<InternerState>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an already interned string without allocating a new id.
    pub fn get(&self, s: &str) -> Option<KeyId> {
        self.state.read().ids.get(s).copied()
    }

    pub fn get_or_intern(&self, s: &str) -> KeyId {
        if let Some(id) = self.get(s) {
            return id;
        }

        let mut state = self.state.write();
        // Another writer may have won the race between the read and write lock.
        if let Some(&id) = state.ids.get(s) {
            return id;
        }

        let id = KeyId(state.names.len() as u32);
        let name: Arc<str> = Arc::from(s);
        state.names.push(name.clone());
        state.ids.insert(name, id);
        id
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.state.read().names.get(id.0 as usize).cloned()
    }

    pub fn resolve_string(&self, id: KeyId) -> String {
        self.resolve(id).map(|s| s.to_string()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_resolvable() {
        let interner = Interner::new();
        let a = interner.get_or_intern("http_reqs");
        let b = interner.get_or_intern("checks");
        assert_ne!(a, b);
        assert_eq!(interner.get_or_intern("http_reqs"), a);
        assert_eq!(interner.resolve(b).as_deref(), Some("checks"));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn get_does_not_intern() {
        let interner = Interner::new();
        assert_eq!(interner.get("missing"), None);
        assert!(interner.is_empty());
    }
}
