// SPDX-License-Identifier: Apache-2.0

//! The per-source loop: read new lines, filter, recency-check, enrich,
//! push, then commit the offset. Every failure is contained here;
//! nothing in one source's pipeline can take down another pipeline or
//! the process. The offset is committed only after the batch's lines
//! have been handed to delivery, so a crash in between re-sends lines
//! instead of losing them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{SourceConfig, SourceLocation};
use crate::enrich;
use crate::geoip::GeoLookup;
use crate::loki::LokiClient;
use crate::offset::OffsetStore;
use crate::recency;
use crate::tailer::{spawn_command, FileTailer};

pub struct SourcePipeline {
    config: SourceConfig,
    client: Arc<LokiClient>,
    geo: Arc<dyn GeoLookup>,
    store: OffsetStore,
    max_age: Duration,
}

impl SourcePipeline {
    pub fn new(
        config: SourceConfig,
        client: Arc<LokiClient>,
        geo: Arc<dyn GeoLookup>,
        store: OffsetStore,
        max_age: Duration,
    ) -> Self {
        SourcePipeline {
            config,
            client,
            geo,
            store,
            max_age,
        }
    }

    /// Runs until the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) {
        match self.config.location.clone() {
            SourceLocation::File(path) => self.run_file(path, cancel).await,
            SourceLocation::Command(command) => self.run_command(command, cancel).await,
        }
    }

    async fn run_file(&self, path: PathBuf, cancel: CancellationToken) {
        info!(
            job = %self.config.job,
            path = %path.display(),
            "starting file tailer"
        );
        let mut tailer = FileTailer::new(path.clone(), self.store.clone());

        loop {
            match tailer.read_new_lines().await {
                Ok(batch) => {
                    for line in &batch.lines {
                        self.process_line(line).await;
                    }
                    if batch.next_offset != tailer.offset() {
                        tailer.commit(batch.next_offset);
                    }
                }
                Err(e) => {
                    warn!(
                        job = %self.config.job,
                        path = %path.display(),
                        "error tailing file: {e}"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!(job = %self.config.job, "file tailer stopped");
    }

    /// Command sources respawn forever: the subprocess exiting (crash
    /// or EOF) is an expected condition, handled with a fixed backoff.
    async fn run_command(&self, command: String, cancel: CancellationToken) {
        info!(job = %self.config.job, %command, "starting command tailer");

        loop {
            match spawn_command(&command) {
                Ok((mut child, mut lines)) => loop {
                    tokio::select! {
                        next = lines.next_line() => match next {
                            Ok(Some(line)) => self.process_line(&line).await,
                            Ok(None) => {
                                debug!(job = %self.config.job, "command exited; respawning after backoff");
                                let _ = child.wait().await;
                                break;
                            }
                            Err(e) => {
                                warn!(job = %self.config.job, "error reading command output: {e}");
                                let _ = child.kill().await;
                                break;
                            }
                        },
                        _ = cancel.cancelled() => {
                            let _ = child.kill().await;
                            info!(job = %self.config.job, "command tailer stopped");
                            return;
                        }
                    }
                },
                Err(e) => {
                    error!(job = %self.config.job, "failed to spawn {command:?}: {e}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!(job = %self.config.job, "command tailer stopped");
    }

    /// Filter, recency-check, enrich, push. A failed push is logged
    /// with the job and line, then the record is discarded; the
    /// at-least-once guarantee covers crash recovery, not per-request
    /// backend failures.
    async fn process_line(&self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        if let Some(filter) = &self.config.filter {
            if !filter.accepts(line) {
                return;
            }
        }
        if !recency::is_recent(&self.config.job, line, self.max_age, Utc::now()) {
            return;
        }

        let record = enrich::enrich(&self.config.job, line, self.geo.as_ref());
        match self.client.push(&record).await {
            Ok(()) => debug!(job = %record.job, "pushed: {line}"),
            Err(e) => error!(job = %record.job, "error pushing line {line:?}: {e}"),
        }
    }
}
