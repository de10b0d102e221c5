use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key-value storage used by every handler.
///
/// Keys are namespaced strings such as `user:{id}` or `relationship:{a}:{b}`.
/// Values are opaque bytes; use [`KvStoreExt`] for JSON documents and id lists.
pub trait KvStore {
    /// Get the value for a key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// List all keys starting with `prefix`, sorted.
    fn scan_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    /// Remove a key and return its previous value.
    fn take(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let value = self.get(key)?;
        if value.is_some() {
            self.delete(key)?;
        }
        Ok(value)
    }
}

/// JSON and id-list helpers on top of any [`KvStore`].
pub trait KvStoreExt: KvStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, &serde_json::to_vec(value)?)
    }

    /// Read an id list, treating a missing key as empty.
    fn get_list(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.get_json(key)?.unwrap_or_default())
    }

    /// Append `id` unless already present.
    fn push_unique(&self, key: &str, id: &str) -> anyhow::Result<bool> {
        let mut list = self.get_list(key)?;
        if list.iter().any(|existing| existing == id) {
            return Ok(false);
        }
        list.push(id.to_string());
        self.set_json(key, &list)?;
        Ok(true)
    }

    /// Insert `id` at the front (newest first).
    fn prepend(&self, key: &str, id: &str) -> anyhow::Result<()> {
        let mut list = self.get_list(key)?;
        list.retain(|existing| existing != id);
        list.insert(0, id.to_string());
        self.set_json(key, &list)
    }

    fn remove_from_list(&self, key: &str, id: &str) -> anyhow::Result<bool> {
        let mut list = self.get_list(key)?;
        let before = list.len();
        list.retain(|existing| existing != id);
        if list.len() == before {
            return Ok(false);
        }
        self.set_json(key, &list)?;
        Ok(true)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

impl KvStore for spin_sdk::key_value::Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        spin_sdk::key_value::Store::get(self, key)
            .map_err(|e| anyhow::anyhow!("kv get {}: {:?}", key, e))
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        spin_sdk::key_value::Store::set(self, key, value)
            .map_err(|e| anyhow::anyhow!("kv set {}: {:?}", key, e))
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        spin_sdk::key_value::Store::delete(self, key)
            .map_err(|e| anyhow::anyhow!("kv delete {}: {:?}", key, e))
    }

    fn scan_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = spin_sdk::key_value::Store::get_keys(self)
            .map_err(|e| anyhow::anyhow!("kv get_keys: {:?}", e))?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Process-local store backing the native dev server and the tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn scan_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn take(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries()?.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_and_missing_key() {
        let store = MemoryStore::new();
        assert!(store.get_json::<Vec<String>>("missing").unwrap().is_none());

        store.set_json("k", &vec!["a".to_string()]).unwrap();
        assert_eq!(store.get_list("k").unwrap(), vec!["a"]);
    }

    #[test]
    fn list_helpers_keep_ids_unique() {
        let store = MemoryStore::new();
        assert!(store.push_unique("ids", "a").unwrap());
        assert!(!store.push_unique("ids", "a").unwrap());
        store.prepend("ids", "b").unwrap();
        store.prepend("ids", "a").unwrap();
        assert_eq!(store.get_list("ids").unwrap(), vec!["a", "b"]);

        assert!(store.remove_from_list("ids", "a").unwrap());
        assert!(!store.remove_from_list("ids", "a").unwrap());
        assert_eq!(store.get_list("ids").unwrap(), vec!["b"]);
    }

    #[test]
    fn scan_and_take() {
        let store = MemoryStore::new();
        store.set("outbox:2", b"two").unwrap();
        store.set("outbox:1", b"one").unwrap();
        store.set("other", b"x").unwrap();

        assert_eq!(store.scan_keys("outbox:").unwrap(), vec!["outbox:1", "outbox:2"]);
        assert_eq!(store.take("outbox:1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.take("outbox:1").unwrap(), None);
    }
}
