// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dated view of the remote store at one observation instant.

use time::OffsetDateTime;
use tracing::debug;

use crate::name::NameCodec;
use crate::transport::{RemoteEntry, Transport, TransportError};

/// One stored backup unit as seen in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// File name (final path component only).
    pub name: String,
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// Creation instant decoded from `name`; `None` when the name cannot be dated.
    pub timestamp: Option<OffsetDateTime>,
}

impl Archive {
    /// Returns `true` when the archive's age is known and it can take part in retention.
    pub fn is_dated(&self) -> bool {
        self.timestamp.is_some()
    }
}

/// The archives present in one remote directory.
///
/// Undatable entries stay in the inventory: they cannot be ordered for eviction but
/// they still occupy quota.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    archives: Vec<Archive>,
}

impl Inventory {
    /// Wrap already-dated archives.
    pub fn new(archives: Vec<Archive>) -> Self {
        Self { archives }
    }

    /// Build an inventory from raw listing entries, dating each one with `codec`.
    pub fn from_entries<I>(entries: I, codec: &NameCodec) -> Self
    where
        I: IntoIterator<Item = RemoteEntry>,
    {
        let archives = entries
            .into_iter()
            .map(|entry| {
                let name = base_name(&entry.name).to_owned();
                let timestamp = codec.decode(&name);
                Archive {
                    name,
                    size_bytes: entry.size_bytes,
                    timestamp,
                }
            })
            .collect();
        Self { archives }
    }

    /// All archives in listing order.
    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    /// Number of entries, dated or not.
    pub fn len(&self) -> usize {
        self.archives.len()
    }

    /// Returns `true` if the listing was empty.
    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }

    /// Bytes occupied by every entry, dated or not. Saturates at `u64::MAX`.
    pub fn total_size(&self) -> u64 {
        self.archives
            .iter()
            .fold(0u64, |acc, a| acc.saturating_add(a.size_bytes))
    }

    /// Entries whose age is known.
    pub fn dated(&self) -> impl Iterator<Item = &Archive> {
        self.archives.iter().filter(|a| a.is_dated())
    }

    /// Entries whose name does not follow the archive layout.
    pub fn undated(&self) -> impl Iterator<Item = &Archive> {
        self.archives.iter().filter(|a| !a.is_dated())
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&Archive> {
        self.archives.iter().find(|a| a.name == name)
    }

    /// Copy of this inventory without the named entries.
    ///
    /// Used for archives this run is about to overwrite: their current remote copy
    /// is replaced by the upload, so it neither occupies quota afterwards nor may be
    /// evicted.
    pub fn without<'a, I>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let skip: Vec<&str> = names.into_iter().collect();
        Self {
            archives: self
                .archives
                .iter()
                .filter(|a| !skip.contains(&a.name.as_str()))
                .cloned()
                .collect(),
        }
    }
}

fn base_name(raw: &str) -> &str {
    raw.rsplit_once('/').map_or(raw, |(_, name)| name)
}

/// List `dir` once through `transport` and date every entry.
///
/// A listing failure is returned as-is; there is no retry.
pub async fn list_inventory<T>(
    transport: &T,
    dir: &str,
    codec: &NameCodec,
) -> Result<Inventory, TransportError>
where
    T: Transport,
{
    let entries = transport.list(dir).await?;
    let inventory = Inventory::from_entries(entries, codec);
    debug!(
        dir,
        entries = inventory.len(),
        undated = inventory.undated().count(),
        total_bytes = inventory.total_size(),
        "remote inventory read"
    );
    Ok(inventory)
}
