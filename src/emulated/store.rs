use std::{collections::HashMap, io};

use parking_lot::Mutex;

use crate::control::{WatchCallback, XenStore};

/// Key-value store with watches, standing in for the toolstack's store.
#[derive(Default)]
pub struct EmulatedStore {
    values: Mutex<HashMap<String, String>>,
    watches: Mutex<Vec<(String, WatchCallback)>>,
}

impl EmulatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `path` and fires the watches registered on it.
    pub fn write(&self, path: &str, value: &str) {
        let _prev = self
            .values
            .lock()
            .insert(path.to_owned(), value.to_owned());
        self.fire(path);
    }

    /// Deletes `path` and fires the watches registered on it.
    pub fn remove(&self, path: &str) {
        let _prev = self.values.lock().remove(path);
        self.fire(path);
    }

    fn fire(&self, path: &str) {
        let callbacks: Vec<_> = self
            .watches
            .lock()
            .iter()
            .filter(|(watched, _)| watched == path)
            .map(|(_, callback)| WatchCallback::clone(callback))
            .collect();
        for callback in callbacks {
            callback(self, path);
        }
    }
}

impl std::fmt::Debug for EmulatedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedStore")
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

impl XenStore for EmulatedStore {
    fn read(&self, dir: &str, node: &str) -> io::Result<String> {
        let path = if dir.is_empty() {
            node.to_owned()
        } else {
            format!("{dir}/{node}")
        };
        self.values
            .lock()
            .get(&path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{path} not found")))
    }

    fn watch(&self, path: &str, callback: WatchCallback) -> io::Result<()> {
        self.watches.lock().push((path.to_owned(), callback));
        Ok(())
    }
}
