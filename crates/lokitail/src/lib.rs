// SPDX-License-Identifier: Apache-2.0

//! Tails local log sources, classifies and enriches each new line, and
//! pushes accepted lines to a Loki-compatible backend over its HTTP
//! push API. Per-source read offsets are persisted so restarts resume
//! where the previous run stopped.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod enrich;
pub mod geoip;
pub mod loki;
pub mod offset;
pub mod pipeline;
pub mod recency;
pub mod supervisor;
pub mod tailer;
