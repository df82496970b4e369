// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for dumpvault crates.
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`transport`] - In-memory remote store with failure injection
//! - [`collab`] - Dump producer and archiver fakes
//! - [`fixtures`] - Job configs and fixed clocks
#![forbid(unsafe_code)]

pub mod collab;
pub mod config;
pub mod fixtures;
pub mod transport;

pub use collab::{FakeArchiver, FakeDumper};
pub use config::InMemoryConfigStore;
pub use fixtures::{job_config, march_first_2024, raw_job_config, FIXED_ARCHIVE_NAME};
pub use transport::{InMemoryTransport, TransportCall};
