// SPDX-License-Identifier: Apache-2.0

//! Push client for the Loki HTTP API. One record is serialized as a
//! single-entry batch and POSTed to the push endpoint; 204 No Content
//! is the only success. Failures are bounded-retried per the
//! configured strategy and then surfaced to the pipeline, which logs
//! and discards the record.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::enrich::LogRecord;

/// Push path appended to the configured base URL.
pub const PUSH_PATH: &str = "/loki/api/v1/push";

/// How failed pushes are retried before the record is discarded.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Up to the given number of attempts with no pause between them.
    Immediate(u64),
    /// Up to the given number of attempts, sleeping the given number of
    /// milliseconds between them.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    fn attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    async fn pause(&self) {
        if let RetryStrategy::LinearBackoff(_, delay_ms) = self {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }
    }
}

#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("Failed to prepare payload: {0}")]
    Payload(String),
    #[error("{1}")]
    Destination(Option<StatusCode>, String),
}

#[derive(Serialize)]
struct PushRequest<'a> {
    streams: Vec<Stream<'a>>,
}

#[derive(Serialize)]
struct Stream<'a> {
    stream: &'a BTreeMap<String, String>,
    values: Vec<(String, &'a str)>,
}

pub struct LokiClient {
    client: reqwest::Client,
    push_url: String,
    retry_strategy: RetryStrategy,
}

impl LokiClient {
    /// `push_url` is the full push endpoint URL. The timeout bounds
    /// every attempt so a wedged backend cannot stall a pipeline
    /// indefinitely.
    pub fn new(
        push_url: String,
        timeout: Duration,
        retry_strategy: RetryStrategy,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(LokiClient {
            client,
            push_url,
            retry_strategy,
        })
    }

    /// Pushes one record as a single-stream, single-value batch.
    pub async fn push(&self, record: &LogRecord) -> Result<(), ShippingError> {
        let request = PushRequest {
            streams: vec![Stream {
                stream: &record.labels,
                values: vec![(record.timestamp_ns.to_string(), record.line.as_str())],
            }],
        };
        let body =
            serde_json::to_vec(&request).map_err(|e| ShippingError::Payload(e.to_string()))?;
        self.send_with_retry(body).await
    }

    /// 4xx responses are permanent: the same payload would be rejected
    /// again, so they fail without further attempts. 5xx and transport
    /// errors are retried up to the attempt budget.
    async fn send_with_retry(&self, body: Vec<u8>) -> Result<(), ShippingError> {
        let attempts = self.retry_strategy.attempts();
        let mut last_status = None;
        let mut last_message = String::new();

        for attempt in 1..=attempts {
            match self
                .client
                .post(&self.push_url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NO_CONTENT {
                        debug!("Pushed log line in {attempt} attempt(s)");
                        return Ok(());
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        return Err(ShippingError::Destination(
                            Some(status),
                            format!("Failed to send request after {attempt} attempts: {status} {text}"),
                        ));
                    }
                    last_status = Some(status);
                    last_message = format!("{status} {text}");
                }
                Err(e) => {
                    last_status = e.status();
                    last_message = e.to_string();
                }
            }
            if attempt < attempts {
                self.retry_strategy.pause().await;
            }
        }

        Err(ShippingError::Destination(
            last_status,
            format!("Failed to send request after {attempts} attempts: {last_message}"),
        ))
    }
}
