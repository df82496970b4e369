// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retention engine and backup pipeline for dumpvault.
//!
//! A run produces one dump per configured data source, bundles the dumps into a
//! single timestamp-named archive, and ships it to a remote store that has a fixed
//! byte quota. Before uploading, the [`RetentionPolicy`] picks the oldest stored
//! archives to evict so the new one fits.
//!
//! # Layering
//!
//! - [`NameCodec`] maps archive creation time to its stored filename and back.
//! - [`Inventory`] is the dated view of one remote listing.
//! - [`RetentionPolicy`] is a pure function from inventory + quota + incoming size to a
//!   [`DeletionPlan`].
//! - [`Pipeline`] sequences the stages and talks to the outside world only through the
//!   [`Transport`], [`DumpProducer`] and [`Archiver`] ports.
//!
//! # Determinism Invariant
//!
//! Plans never depend on listing order. Candidates are ordered by `(timestamp, name)`,
//! so the same inventory always yields the same plan.
#![forbid(unsafe_code)]

pub mod collab;
pub mod config;
pub mod error;
pub mod inventory;
pub mod lock;
pub mod name;
pub mod pipeline;
pub mod retention;
pub mod transport;

pub use collab::{ArchiveError, Archiver, DumpError, DumpProducer};
pub use config::{
    CommandSpec, ConfigError, ConfigService, ConfigStore, Credentials, DataSource, JobConfig,
    RawJobConfig, Remote, RemoteBackend, Timeouts,
};
pub use error::{FailureCause, RunError, Stage};
pub use inventory::{list_inventory, Archive, Inventory};
pub use lock::WorkspaceLock;
pub use name::{NameCodec, NameError};
pub use pipeline::{Clock, Pipeline, RunReport, StopSignal};
pub use retention::{DeletionPlan, PlanStatus, RetentionPolicy};
pub use transport::{remote_path, RemoteEntry, Transport, TransportError};
