use crate::{
    exposure_logger::NoopExposureLogger,
    sticky::InMemoryStickyBucketStore,
    targeting::{NoopFlagResolver, NoopSavedGroups},
    Client, ExposureLogger, FlagResolver, SavedGroups, StickyBucketStore,
};

/// Configuration for [`Client`].
pub struct ClientConfig<'a> {
    pub(crate) client_key: String,
    pub(crate) api_host: String,
    pub(crate) exposure_logger: Box<dyn ExposureLogger + Send + Sync + 'a>,
    pub(crate) sticky_bucket_store: Box<dyn StickyBucketStore + Send + Sync + 'a>,
    pub(crate) flag_resolver: Box<dyn FlagResolver + Send + Sync + 'a>,
    pub(crate) saved_groups: Box<dyn SavedGroups + Send + Sync + 'a>,
}

impl<'a> ClientConfig<'a> {
    /// Create a default configuration using the specified client key.
    ///
    /// Sticky assignments are kept in process memory. Prerequisites and saved group targeting
    /// fail closed until a [`FlagResolver`] and [`SavedGroups`] provider are configured.
    ///
    /// ```
    /// # use bucketing::ClientConfig;
    /// ClientConfig::from_client_key("client-key");
    /// ```
    pub fn from_client_key(client_key: impl Into<String>) -> Self {
        ClientConfig {
            client_key: client_key.into(),
            api_host: ClientConfig::DEFAULT_API_HOST.to_owned(),
            exposure_logger: Box::new(NoopExposureLogger),
            sticky_bucket_store: Box::new(InMemoryStickyBucketStore::new()),
            flag_resolver: Box::new(NoopFlagResolver),
            saved_groups: Box::new(NoopSavedGroups),
        }
    }

    /// Set exposure logger to pass exposures to your data warehouse.
    ///
    /// ```
    /// # use bucketing::{ClientConfig, ExposureEvent};
    /// let mut config = ClientConfig::from_client_key("client-key");
    /// config.exposure_logger(|event: ExposureEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn exposure_logger(
        &mut self,
        exposure_logger: impl ExposureLogger + Send + Sync + 'a,
    ) -> &mut Self {
        self.exposure_logger = Box::new(exposure_logger);
        self
    }

    /// Set the store persisting sticky bucket documents.
    pub fn sticky_bucket_store(
        &mut self,
        sticky_bucket_store: impl StickyBucketStore + Send + Sync + 'a,
    ) -> &mut Self {
        self.sticky_bucket_store = Box::new(sticky_bucket_store);
        self
    }

    /// Set the resolver used for prerequisite flags.
    pub fn flag_resolver(&mut self, flag_resolver: impl FlagResolver + Send + Sync + 'a) -> &mut Self {
        self.flag_resolver = Box::new(flag_resolver);
        self
    }

    /// Set the saved group membership provider.
    pub fn saved_groups(&mut self, saved_groups: impl SavedGroups + Send + Sync + 'a) -> &mut Self {
        self.saved_groups = Box::new(saved_groups);
        self
    }

    /// Default API host.
    pub const DEFAULT_API_HOST: &'static str = "http://localhost:3100/api";

    /// Override API host. Self-hosted deployments should point this at their API server.
    pub fn api_host(&mut self, api_host: impl Into<String>) -> &mut Self {
        self.api_host = api_host.into();
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use bucketing::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_client_key("client-key").to_client();
    /// ```
    pub fn to_client(self) -> Client<'a> {
        Client::new(self)
    }
}
