// SPDX-License-Identifier: Apache-2.0

//! Owns the configured sources and runs one independent pipeline task
//! per source for the process lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::geoip::GeoLookup;
use crate::loki::LokiClient;
use crate::offset::OffsetStore;
use crate::pipeline::SourcePipeline;

pub struct Supervisor {
    pipelines: Vec<SourcePipeline>,
}

impl Supervisor {
    pub fn new(
        sources: Vec<SourceConfig>,
        max_age: Duration,
        client: Arc<LokiClient>,
        geo: Arc<dyn GeoLookup>,
        store: OffsetStore,
    ) -> Self {
        let pipelines = sources
            .into_iter()
            .map(|source| {
                SourcePipeline::new(
                    source,
                    Arc::clone(&client),
                    Arc::clone(&geo),
                    store.clone(),
                    max_age,
                )
            })
            .collect();
        Supervisor { pipelines }
    }

    /// Spawns every pipeline and joins them all. Pipelines exit when
    /// `cancel` fires, so this returns only on shutdown; a pipeline
    /// that dies early is logged but not restarted (its own internal
    /// retry loops are its resilience mechanism).
    pub async fn run(self, cancel: CancellationToken) {
        info!("starting {} source pipelines", self.pipelines.len());

        let mut tasks = Vec::with_capacity(self.pipelines.len());
        for pipeline in self.pipelines {
            tasks.push(tokio::spawn(pipeline.run(cancel.clone())));
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!("source pipeline task ended abnormally: {e}");
            }
        }
        info!("all source pipelines stopped");
    }
}
