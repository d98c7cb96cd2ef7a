//! Load features from a remote endpoint and follow updates.
//!
//! ```text
//! GATEKEEP_API_HOST=https://cdn.example.com GATEKEEP_CLIENT_KEY=sdk-abc \
//!     cargo run --example remote
//! ```

use std::time::Duration;

use gatekeep::{Client, Context, LoadOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "gatekeep=debug".into()))
        .init();

    let api_host = std::env::var("GATEKEEP_API_HOST").unwrap_or_else(|_| "http://localhost:3100".into());
    let client_key = std::env::var("GATEKEEP_CLIENT_KEY").unwrap_or_else(|_| "sdk-dev".into());

    let mut context = Context::new()
        .with_api_host(api_host)
        .with_client_key(client_key)
        .with_attribute("id", "user-42")
        .with_dev_mode(true);
    if let Ok(key) = std::env::var("GATEKEEP_DECRYPTION_KEY") {
        context = context.with_decryption_key(key);
    }

    let client = Client::new(context);
    let options = LoadOptions {
        auto_refresh: true,
        timeout: Some(Duration::from_secs(5)),
        ..LoadOptions::default()
    };

    match client.load_features(options).await {
        Ok(features) => println!("loaded {features}"),
        Err(err) => {
            eprintln!("could not load features: {err}");
            return;
        }
    }

    for _ in 0..3 {
        let features = client.features();
        let mut keys: Vec<_> = features.keys().collect();
        keys.sort_unstable();
        for key in keys {
            println!("{key}: {}", client.evaluate_feature(key));
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }

    client.destroy();
}
