use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Attributes;

/// Emitted the first time a context is included in an experiment phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ExposureEvent {
    pub experiment_id: String,
    pub tracking_key: String,
    pub phase_index: usize,
    pub variation_index: usize,
    pub variation_key: String,
    pub hash_attribute: String,
    pub identifier: String,
    pub sticky: bool,
    pub attributes: Attributes,
    pub timestamp: String,
    pub meta_data: HashMap<String, String>,
}

impl ExposureEvent {
    pub(crate) fn meta_data() -> HashMap<String, String> {
        HashMap::from([
            ("sdkLanguage".to_owned(), "rust".to_owned()),
            (
                "sdkVersion".to_owned(),
                env!("CARGO_PKG_VERSION").to_owned(),
            ),
        ])
    }
}

/// Telemetry sink receiving exposure events.
pub trait ExposureLogger {
    /// Called at most once per `(experiment, phase, identifier)` for the lifetime of a client.
    fn record_exposure(&self, event: ExposureEvent);
}

pub(crate) struct NoopExposureLogger;
impl ExposureLogger for NoopExposureLogger {
    fn record_exposure(&self, _event: ExposureEvent) {}
}

impl<T: Fn(ExposureEvent)> ExposureLogger for T {
    fn record_exposure(&self, event: ExposureEvent) {
        self(event);
    }
}
