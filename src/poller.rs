use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

use rand::{thread_rng, Rng};
use reqwest::{StatusCode, Url};

use crate::{configuration_store::ConfigurationStore, experiment::ExperimentConfig, Error, Result};

pub(crate) struct PollerThreadConfig {
    pub store: Arc<ConfigurationStore>,
    pub api_host: String,
    pub client_key: String,
}

/// A configuration poller thread.
///
/// Use [`Client::start_poller_thread`](crate::Client::start_poller_thread) to get an instance of
/// it.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::Sender<()>,

    /// Holds `None` if configuration hasn't been fetched yet. Holds `Some(Ok(()))` if configuration
    /// has been fetched successfully. Holds `Some(Err(...))` if there was an error fetching the
    /// first configuration.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

const CONFIG_ENDPOINT: &str = "/experiments/v1/config";

const POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
const POLL_JITTER: Duration = Duration::from_secs(30);

impl PollerThread {
    pub(crate) fn start(config: PollerThreadConfig) -> Result<PollerThread> {
        let (stop_sender, stop_receiver) = std::sync::mpsc::channel::<()>();

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value| {
                let (lock, condvar) = &*result;
                *lock.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                condvar.notify_all();
            };

            let client = reqwest::blocking::Client::new();
            let url = Url::parse_with_params(
                &format!("{}{}", config.api_host, CONFIG_ENDPOINT),
                &[
                    ("clientKey", &*config.client_key),
                    ("sdkName", "rust"),
                    ("sdkVersion", env!("CARGO_PKG_VERSION")),
                ],
            )
            .map_err(Error::InvalidBaseUrl)?;

            std::thread::Builder::new()
                .name("bucketing-poller".to_owned())
                .spawn(move || loop {
                    match fetch_configuration(&client, &url) {
                        Ok(configuration) => {
                            log::debug!(target: "bucketing",
                                        experiments = configuration.experiments.len();
                                        "successfully fetched configuration");
                            config.store.set_configuration(configuration);
                            update_result(Ok(()));
                        }
                        Err(FetchError::Unauthorized) => {
                            log::warn!(target: "bucketing", "client is not authorized. Check your client key");
                            update_result(Err(Error::Unauthorized));
                            // Unauthorized means that the client key is not valid and thus is
                            // not recoverable. Stop the poller thread.
                            return;
                        }
                        Err(FetchError::Transient(message)) => {
                            // Ignore other errors, we'll try another request later.
                            log::warn!(target: "bucketing", "failed to fetch configuration: {message}");
                        }
                    }

                    let timeout = jitter(POLL_INTERVAL, POLL_JITTER);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            // Timed out. Loop to fetch new configuration.
                        }
                        Ok(()) => {
                            log::debug!(target: "bucketing", "poller thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // When the other end of channel disconnects, calls to
                            // .recv_timeout() return immediately. Use normal thread sleep in
                            // this case.
                            std::thread::sleep(timeout);
                        }
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block waiting for the first configuration to get fetched.
    pub fn wait_for_configuration(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => {
                    // The poller has already fetched the configuration. Return Ok(()) or a possible
                    // error.
                    return result.clone();
                }
                None => {
                    // Block waiting for configuration to get fetched.
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited). Ignoring it as there's nothing
        // useful we can do.
        let _ = self.stop_sender.send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`PollerThread::stop`] instead.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        // Error means that the thread has panicked and there's nothing useful we can do in that
        // case.
        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

enum FetchError {
    Unauthorized,
    Transient(String),
}

fn fetch_configuration(
    client: &reqwest::blocking::Client,
    url: &Url,
) -> std::result::Result<ExperimentConfig, FetchError> {
    log::debug!(target: "bucketing", "fetching new configuration");
    let response = client
        .get(url.clone())
        .send()
        .map_err(|err| FetchError::Transient(err.to_string()))?;

    match response.status() {
        StatusCode::OK => response
            .json()
            .map_err(|err| FetchError::Transient(format!("invalid response body: {err}"))),
        StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized),
        code => Err(FetchError::Transient(format!("received non-200 response: {code}"))),
    }
}

/// Apply a random jitter to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    interval + thread_rng().gen_range(Duration::ZERO..jitter)
}
