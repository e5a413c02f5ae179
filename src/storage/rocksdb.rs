//! RocksDB backing store.
//!
//! One column family per logical table. Values are either bincode-encoded
//! records ([`RocksDbHandle::put`]) or raw bytes ([`RocksDbHandle::put_raw`],
//! used for messages that are kept in their JSON wire form).

use crate::error::{OpchanError, Result};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

// =============================================================================
// RocksDB Configuration
// =============================================================================

/// Configuration for RocksDB storage.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Maximum number of open files.
    pub max_open_files: i32,
    /// Number of log files to keep.
    pub keep_log_file_num: usize,
    /// Maximum WAL size in bytes.
    pub max_wal_size: u64,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum number of write buffers.
    pub max_write_buffer_number: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            max_open_files: 64,
            keep_log_file_num: 2,
            max_wal_size: 8 * 1024 * 1024,      // 8MB
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            max_write_buffer_number: 2,
        }
    }
}

impl RocksDbConfig {
    /// Configuration for long-running clients that cache large forums.
    pub fn for_server() -> Self {
        Self {
            max_open_files: 256,
            keep_log_file_num: 3,
            max_wal_size: 64 * 1024 * 1024,      // 64MB
            write_buffer_size: 32 * 1024 * 1024, // 32MB
            max_write_buffer_number: 3,
        }
    }

    /// Builds RocksDB Options from this configuration.
    pub fn build_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(self.keep_log_file_num);
        opts.set_max_total_wal_size(self.max_wal_size);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }
}

/// Creates a composite key from two parts.
///
/// Format: `{part1}:{part2}`
pub fn composite_key(part1: &str, part2: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(part1.len() + 1 + part2.len());
    key.extend_from_slice(part1.as_bytes());
    key.push(b':');
    key.extend_from_slice(part2.as_bytes());
    key
}

// =============================================================================
// Database Handle
// =============================================================================

/// Thread-safe handle over a RocksDB instance with named column families.
pub struct RocksDbHandle {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    column_families: Vec<String>,
}

impl RocksDbHandle {
    /// Opens (creating if needed) a database with the given column families.
    pub fn open(
        db_path: impl AsRef<Path>,
        config: &RocksDbConfig,
        column_families: &[&str],
    ) -> Result<Self> {
        let opts = config.build_options();
        let cf_opts = Options::default();

        let cf_descriptors: Vec<_> = column_families
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(*cf, cf_opts.clone()))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            db_path.as_ref(),
            cf_descriptors,
        )
        .map_err(|e| OpchanError::storage(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            column_families: column_families.iter().map(|cf| cf.to_string()).collect(),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| OpchanError::storage(format!("Column family '{}' not found", name)))
    }

    /// Stores a bincode-encoded record.
    pub fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)
            .map_err(|e| OpchanError::serialization(format!("Failed to serialize: {}", e)))?;
        self.put_raw(cf_name, key, &bytes)
    }

    /// Stores raw bytes.
    pub fn put_raw(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;

        trace!(
            cf = cf_name,
            key_len = key.len(),
            value_bytes = value.len(),
            "db_put: storing value"
        );

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| OpchanError::storage(format!("Failed to write: {}", e)))
    }

    /// Loads and decodes a bincode record.
    pub fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        match self.get_raw(cf_name, key)? {
            Some(bytes) => Self::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes a bincode record read through [`iterate_all`](Self::iterate_all).
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| OpchanError::serialization(format!("Failed to deserialize: {}", e)))
    }

    /// Loads raw bytes.
    pub fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;

        let value = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| OpchanError::storage(format!("Failed to read: {}", e)))?;

        trace!(
            cf = cf_name,
            key_len = key.len(),
            found = value.is_some(),
            "db_get: lookup"
        );

        Ok(value)
    }

    /// Deletes a key.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;

        trace!(cf = cf_name, key_len = key.len(), "db_delete: deleting key");

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| OpchanError::storage(format!("Failed to delete: {}", e)))
    }

    /// Iterates over all entries with the given prefix.
    ///
    /// The callback returns true to continue or false to stop.
    pub fn prefix_iterate<F>(&self, cf_name: &str, prefix: &[u8], mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let cf = self.cf(cf_name)?;
        let mode = rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward);

        let mut count: usize = 0;
        for item in self.db.iterator_cf(&cf, mode) {
            match item {
                Ok((key, value)) => {
                    if !key.starts_with(prefix) {
                        break;
                    }
                    count += 1;
                    if !callback(&key, &value) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Iterator error: {}", e);
                }
            }
        }

        debug!(
            cf = cf_name,
            prefix_len = prefix.len(),
            records_iterated = count,
            "db_prefix_iterate: completed iteration"
        );

        Ok(())
    }

    /// Iterates over every entry of a column family.
    pub fn iterate_all<F>(&self, cf_name: &str, callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.prefix_iterate(cf_name, &[], callback)
    }

    /// Deletes every entry with the given prefix, returning how many were removed.
    pub fn prefix_delete(&self, cf_name: &str, prefix: &[u8]) -> Result<usize> {
        let mut keys = Vec::new();
        self.prefix_iterate(cf_name, prefix, |key, _| {
            keys.push(key.to_vec());
            true
        })?;
        for key in &keys {
            self.delete(cf_name, key)?;
        }
        Ok(keys.len())
    }

    /// Empties every column family this handle was opened with.
    pub fn clear_all(&self) -> Result<usize> {
        let mut deleted = 0;
        for cf in &self.column_families {
            deleted += self.prefix_delete(cf, &[])?;
        }
        debug!(records_deleted = deleted, "db_clear_all: emptied database");
        Ok(deleted)
    }
}

impl std::fmt::Debug for RocksDbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbHandle")
            .field("column_families", &self.column_families)
            .finish()
    }
}
