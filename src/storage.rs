use std::collections::HashMap;

use parking_lot::Mutex;

/// String key/value storage shaped like the browser's web storage.
///
/// The reconciler uses a tab-scoped instance (session storage) for its
/// fingerprint; the Supabase store uses a persistent one for sessions and
/// PKCE verifiers.
pub trait Storage: Send + Sync + 'static {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

/// In-process storage. Contents live as long as the value does.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items.lock().insert(key.to_owned(), value.to_owned());
    }

    fn remove_item(&self, key: &str) {
        self.items.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let storage = MemoryStorage::new();
        assert!(storage.get_item("k").is_none());

        storage.set_item("k", "v1");
        storage.set_item("k", "v2");
        assert_eq!(storage.get_item("k").as_deref(), Some("v2"));
        assert_eq!(storage.len(), 1);

        storage.remove_item("k");
        assert!(storage.is_empty());
    }
}
