use std::{io, sync::Arc};

use log::{debug, error};

use crate::{config::BalloonConfig, constants::PAGE_SHIFT};

use super::TargetControl;

/// Called with the store and the watched path whenever the node changes.
pub type WatchCallback = Arc<dyn Fn(&dyn XenStore, &str) + Send + Sync>;

/// The configuration store shared between the guest and its toolstack.
pub trait XenStore: Send + Sync {
    /// Reads `dir/node`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or cannot be read.
    fn read(&self, dir: &str, node: &str) -> io::Result<String>;

    /// Registers `callback` for changes of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the watch.
    fn watch(&self, path: &str, callback: WatchCallback) -> io::Result<()>;
}

/// Watches the target node of `config` and forwards every new value to
/// `target`.
pub(crate) fn register_target_watch<S: XenStore + ?Sized>(
    store: &S,
    config: &BalloonConfig,
    target: Arc<dyn TargetControl>,
) -> io::Result<()> {
    let (dir, node) = config.target_node();
    let (dir, node) = (dir.to_owned(), node.to_owned());
    let callback: WatchCallback = Arc::new(move |store: &dyn XenStore, path: &str| {
        debug!("watch fired on {path}");
        watch_target(store, &dir, &node, target.as_ref());
    });
    store.watch(&config.target_key, callback)
}

fn watch_target(store: &dyn XenStore, dir: &str, node: &str, target: &dyn TargetControl) {
    let value = match store.read(dir, node) {
        Ok(value) => value,
        Err(err) => {
            error!("unable to read {dir}/{node}: {err}");
            return;
        }
    };
    match value.trim().parse::<u64>() {
        Ok(bytes) => target.set_new_target(bytes >> PAGE_SHIFT),
        Err(err) => error!("unable to parse {dir}/{node} value {value:?}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::{balloon::BalloonStats, emulated::EmulatedStore, ledger::HardLimit};

    #[derive(Default)]
    struct Recorder {
        targets: Mutex<Vec<u64>>,
    }

    impl TargetControl for Recorder {
        fn set_new_target(&self, target_pages: u64) {
            self.targets.lock().push(target_pages);
        }

        fn stats(&self) -> BalloonStats {
            BalloonStats {
                current_pages: 0,
                target_pages: 0,
                pool_low: 0,
                pool_high: 0,
                hard_limit: HardLimit::Unknown,
                driver_pages: 0,
            }
        }
    }

    fn watched() -> (EmulatedStore, Arc<Recorder>) {
        let store = EmulatedStore::new();
        let recorder = Arc::new(Recorder::default());
        register_target_watch(
            &store,
            &BalloonConfig::default(),
            Arc::clone(&recorder) as Arc<dyn TargetControl>,
        )
        .unwrap();
        (store, recorder)
    }

    #[test]
    fn target_bytes_become_pages() {
        let (store, recorder) = watched();
        store.write("memory/target", "1048576");
        store.write("memory/target", "8192\n");
        assert_eq!(*recorder.targets.lock(), vec![256, 2]);
    }

    #[test]
    fn malformed_target_is_ignored() {
        let (store, recorder) = watched();
        store.write("memory/target", "a lot");
        store.write("memory/target", "-4096");
        assert!(recorder.targets.lock().is_empty());
    }

    #[test]
    fn unreadable_target_is_ignored() {
        let (store, recorder) = watched();
        store.write("memory/target", "4096");
        store.remove("memory/target");
        assert_eq!(*recorder.targets.lock(), vec![1]);
    }

    #[test]
    fn other_nodes_do_not_fire() {
        let (store, recorder) = watched();
        store.write("memory/static-max", "4096");
        assert!(recorder.targets.lock().is_empty());
    }
}
