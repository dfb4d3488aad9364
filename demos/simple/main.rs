use bucketing::{Attributes, ClientConfig, Context, ExposureEvent};

pub fn main() -> bucketing::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("bucketing=debug"))
        .init();

    let client_key = std::env::var("BUCKETING_CLIENT_KEY").unwrap_or_else(|_| "sdk-demo".to_owned());

    let mut config = ClientConfig::from_client_key(client_key);
    if let Ok(api_host) = std::env::var("BUCKETING_API_HOST") {
        config.api_host(api_host);
    }
    config.exposure_logger(|event: ExposureEvent| {
        println!(
            "Exposure: {} -> variation {} ({})",
            event.identifier, event.variation_key, event.tracking_key
        );
    });
    let mut client = config.to_client();

    // Start a poller thread to fetch configuration from the server.
    let poller = client.start_poller_thread()?;

    // Block waiting for configuration. Until this call returns, the client will return None for all
    // assignments.
    poller.wait_for_configuration()?;

    let context = Context::new(Attributes::from([
        ("id".to_owned(), "user_12345".into()),
        ("country".to_owned(), "US".into()),
    ]));

    for (experiment_id, result) in client.evaluate_all(&context) {
        match result {
            Ok(assignment) if assignment.in_experiment => println!(
                "{experiment_id}: variation {:?} (bucket {:?}, value {:?})",
                assignment.variation_key, assignment.bucket, assignment.value
            ),
            Ok(assignment) => println!("{experiment_id}: excluded ({:?})", assignment.exclusion),
            Err(err) => println!("{experiment_id}: error: {err}"),
        }
    }

    poller.shutdown()
}
