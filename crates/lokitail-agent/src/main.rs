// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use lokitail::config::Config;
use lokitail::geoip::{GeoLookup, MaxMindLookup, NoopLookup};
use lokitail::loki::LokiClient;
use lokitail::offset::OffsetStore;
use lokitail::supervisor::Supervisor;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("hyper=off,reqwest=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating config on agent startup: {e}");
            return;
        }
    };

    let store = match OffsetStore::new(&config.state_dir) {
        Ok(store) => store,
        Err(e) => {
            error!(
                "Unable to create state directory {}: {e}",
                config.state_dir.display()
            );
            return;
        }
    };

    let geo: Arc<dyn GeoLookup> = match &config.geoip_db {
        Some(path) => match MaxMindLookup::open(path) {
            Ok(reader) => {
                info!("GeoIP database loaded from {}", path.display());
                Arc::new(reader)
            }
            Err(e) => {
                error!(
                    "Failed to open GeoIP database {}: {e}; geo enrichment disabled",
                    path.display()
                );
                Arc::new(NoopLookup)
            }
        },
        None => {
            info!("GEOIP_DB not set; geo enrichment disabled");
            Arc::new(NoopLookup)
        }
    };

    let client = match LokiClient::new(
        config.push_url.clone(),
        config.push_timeout,
        config.retry_strategy.clone(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build push client: {e}");
            return;
        }
    };

    let supervisor = Supervisor::new(config.sources, config.max_age, client, geo, store);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    info!("Pushing logs to {}", config.push_url);
    supervisor.run(cancel).await;
}
