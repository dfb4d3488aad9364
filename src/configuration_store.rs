use std::sync::{Arc, RwLock};

use crate::experiment::ExperimentConfig;

/// `ConfigurationStore` provides a Sync storage for experiment snapshots that allows concurrent
/// access for readers and writers.
///
/// Snapshots are immutable once stored. Evaluation holds an `Arc` to the snapshot it started
/// with, so a concurrent update never changes an evaluation in flight.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<ExperimentConfig>>>,
}

impl ConfigurationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the latest snapshot, if any has been stored yet.
    pub fn get_configuration(&self) -> Option<Arc<ExperimentConfig>> {
        // Err() is possible only if the lock is poisoned (writer panicked while holding the
        // lock). Using .ok()? here to not crash the app.
        let configuration = self.configuration.read().ok()?;
        configuration.clone()
    }

    /// Set new configuration, returning the previous one.
    ///
    /// Experiment updates that would silently reassign users (variation order changed within a
    /// running phase) are rejected against the previous snapshot.
    pub fn set_configuration(&self, mut config: ExperimentConfig) -> Option<Arc<ExperimentConfig>> {
        // Compared under the write lock so concurrent writers see each other's rejections.
        let mut configuration_slot = self.configuration.write().ok()?;
        if let Some(previous) = configuration_slot.as_deref() {
            config.reject_unsafe_updates(previous);
        }
        std::mem::replace(&mut *configuration_slot, Some(Arc::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, sync::Arc};

    use super::ConfigurationStore;
    use crate::{
        experiment::{ExperimentConfig, TryParse},
        ConfigurationError,
    };

    fn load() -> ExperimentConfig {
        serde_json::from_reader(File::open("tests/data/experiments.json").unwrap()).unwrap()
    }

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::new());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_configuration(ExperimentConfig::default());
            })
            .join();
        }

        assert!(store.get_configuration().is_some());
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = ConfigurationStore::new();
        store.set_configuration(load());
        let snapshot = store.get_configuration().unwrap();

        store.set_configuration(ExperimentConfig::default());
        assert!(!snapshot.experiments.is_empty());
        assert!(store.get_configuration().unwrap().experiments.is_empty());
    }

    #[test]
    fn rejects_reordered_variations() {
        let store = ConfigurationStore::new();
        store.set_configuration(load());

        let mut update = load();
        if let Some(TryParse::Parsed(experiment)) = update.experiments.get_mut("exp_targeted") {
            experiment.variations.swap(0, 1);
        }
        store.set_configuration(update);

        let current = store.get_configuration().unwrap();
        assert_eq!(
            current.rejection("exp_targeted"),
            Some(&ConfigurationError::VariationOrderChanged)
        );
        assert_eq!(current.rejection("exp_dd4gxd4lyel8bwi"), None);

        // Still rejected on the next poll with the same definition.
        let mut repeated = load();
        if let Some(TryParse::Parsed(experiment)) = repeated.experiments.get_mut("exp_targeted") {
            experiment.variations.swap(0, 1);
        }
        store.set_configuration(repeated);
        assert!(store
            .get_configuration()
            .unwrap()
            .rejection("exp_targeted")
            .is_some());
    }

    #[test]
    fn concurrent_writers_keep_rejection() {
        let store = Arc::new(ConfigurationStore::new());
        store.set_configuration(load());

        let handles = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut update = load();
                    if let Some(TryParse::Parsed(experiment)) =
                        update.experiments.get_mut("exp_targeted")
                    {
                        experiment.variations.swap(0, 1);
                    }
                    store.set_configuration(update);
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            store.get_configuration().unwrap().rejection("exp_targeted"),
            Some(&ConfigurationError::VariationOrderChanged)
        );
    }
}
