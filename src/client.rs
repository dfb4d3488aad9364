use std::{collections::HashMap, sync::Arc};

use crate::{
    configuration_store::ConfigurationStore,
    engine::Engine,
    eval::{Assignment, Context},
    poller::{PollerThread, PollerThreadConfig},
    ClientConfig, Result,
};

/// A client evaluating experiments against the latest configuration snapshot.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// The client remembers every `(experiment, phase, identifier)` exposure it has signaled so that
/// each is logged once. This state grows with the number of distinct identifiers; long-running
/// processes can call [`Client::reset_exposures`] periodically to bound it.
///
/// # Examples
/// ```
/// # use bucketing::{Client, ClientConfig};
/// Client::new(ClientConfig::from_client_key("client-key"));
/// ```
pub struct Client<'a> {
    configuration_store: Arc<ConfigurationStore>,
    engine: Engine<'a>,
    client_key: String,
    api_host: String,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    ///
    /// ```
    /// # use bucketing::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::from_client_key("client-key"));
    /// ```
    pub fn new(config: ClientConfig<'a>) -> Self {
        Self::new_with_configuration_store(config, Arc::new(ConfigurationStore::new()))
    }

    /// Create a client reading snapshots from an existing store. Useful when the snapshot is
    /// delivered by other means than the built-in poller.
    pub fn new_with_configuration_store(
        config: ClientConfig<'a>,
        configuration_store: Arc<ConfigurationStore>,
    ) -> Self {
        let ClientConfig {
            client_key,
            api_host,
            exposure_logger,
            sticky_bucket_store,
            flag_resolver,
            saved_groups,
        } = config;

        Client {
            configuration_store,
            engine: Engine::new(
                sticky_bucket_store,
                flag_resolver,
                saved_groups,
                exposure_logger,
            ),
            client_key,
            api_host,
        }
    }

    /// Evaluate the experiment for `context`.
    ///
    /// Returns `Ok(None)` if configuration has not been fetched yet. A context that is not
    /// included in the experiment yields an [`Assignment`] with `in_experiment == false`.
    ///
    /// Exposure is signaled to the configured exposure logger the first time a context is
    /// included in an experiment phase.
    pub fn get_assignment(
        &self,
        experiment_id: &str,
        context: &Context,
    ) -> Result<Option<Assignment>> {
        let Some(configuration) = self.configuration_store.get_configuration() else {
            log::warn!(target: "bucketing", experiment_id; "evaluating an experiment before configuration has been fetched");
            // We treat missing configuration (the poller has not fetched config) as a normal
            // scenario.
            return Ok(None);
        };

        self.engine
            .evaluate(&configuration, experiment_id, context)
            .map(Some)
    }

    /// Get the feature value of the variation assigned to `context`.
    ///
    /// Returns `Ok(None)` if the context is not in the experiment or the assigned variation
    /// carries no value.
    pub fn get_feature_value(
        &self,
        experiment_id: &str,
        context: &Context,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self
            .get_assignment(experiment_id, context)?
            .and_then(|assignment| assignment.value))
    }

    /// Evaluate every experiment in the current snapshot. Each result is independent: a
    /// misconfigured experiment does not affect the others.
    pub fn evaluate_all(&self, context: &Context) -> HashMap<String, Result<Assignment>> {
        let Some(configuration) = self.configuration_store.get_configuration() else {
            log::warn!(target: "bucketing", "evaluating experiments before configuration has been fetched");
            return HashMap::new();
        };

        self.engine.evaluate_all(&configuration, context)
    }

    /// Forget which exposures were already signaled. Subsequent evaluations signal exposure
    /// again the first time each context is included.
    pub fn reset_exposures(&self) {
        self.engine.reset_exposures();
    }

    /// Start a poller thread to fetch configuration from the server.
    pub fn start_poller_thread(&mut self) -> Result<PollerThread> {
        PollerThread::start(PollerThreadConfig {
            store: self.configuration_store.clone(),
            api_host: self.api_host.clone(),
            client_key: self.client_key.clone(),
        })
    }
}
