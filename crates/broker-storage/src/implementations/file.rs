//! File-based storage backend implementation for the broker.
//!
//! This module provides a filesystem implementation of the StorageInterface trait,
//! giving the broker durable order records without external dependencies.
//! Keys of the form `namespace:id` map to `<base>/<namespace>/<id>.bin`, which
//! makes per-namespace key listing a directory scan.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use broker_types::{now_secs, ConfigSchema, Field, FieldType, Schema, ValidationError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size file header for TTL support.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "CBRK"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: Reserved/padding for future use
#[derive(Debug, Clone)]
struct FileHeader {
	magic: [u8; 4],
	version: u16,
	expires_at: u64,
	padding: [u8; 50],
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"CBRK";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	/// Creates a new header with the given TTL.
	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0 // Permanent storage
		} else {
			now_secs().saturating_add(ttl.as_secs())
		};

		Self {
			magic: *Self::MAGIC,
			version: Self::VERSION,
			expires_at,
			padding: [0; 50],
		}
	}

	/// Serializes the header to bytes.
	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(&self.magic);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes[14..64].copy_from_slice(&self.padding);
		bytes
	}

	/// Deserializes a header from bytes.
	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}

		let mut magic = [0u8; 4];
		magic.copy_from_slice(&bytes[0..4]);

		if magic != *Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized file format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);
		let expires_at = u64::from_le_bytes(expires_bytes);

		let mut padding = [0u8; 50];
		padding.copy_from_slice(&bytes[14..64]);

		Ok(Self {
			magic,
			version,
			expires_at,
			padding,
		})
	}

	/// Checks if the data has expired.
	fn is_expired(&self) -> bool {
		self.expires_at != 0 && now_secs() >= self.expires_at
	}
}

/// TTL configuration per namespace.
///
/// Config keys of the form `ttl_<namespace>` (seconds) assign a default TTL
/// to every key under that namespace; unlisted namespaces never expire.
#[derive(Debug, Clone)]
pub struct TtlConfig {
	ttls: HashMap<String, Duration>,
}

impl TtlConfig {
	/// Creates TTL config from TOML configuration.
	fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();

		if let Some(table) = config.as_table() {
			for (key, value) in table {
				if let Some(namespace) = key.strip_prefix("ttl_") {
					if let Some(secs) = value.as_integer() {
						ttls.insert(namespace.to_string(), Duration::from_secs(secs as u64));
					}
				}
			}
		}

		Self { ttls }
	}

	/// Gets the TTL for a specific namespace.
	fn get_ttl(&self, namespace: &str) -> Duration {
		self.ttls.get(namespace).copied().unwrap_or(Duration::ZERO)
	}
}

/// File-based storage implementation.
///
/// This implementation stores data as binary files on the filesystem,
/// providing simple persistence without requiring external dependencies.
/// Files include a header with TTL information for automatic expiration.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// TTL configuration per namespace.
	ttl_config: TtlConfig,
}

impl FileStorage {
	/// Creates a new FileStorage instance with the specified base path and TTL config.
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Self {
		Self {
			base_path,
			ttl_config,
		}
	}

	/// Splits a key into its namespace and id parts.
	///
	/// Keys without a `:` separator land in the base directory.
	fn split_key(key: &str) -> (&str, &str) {
		match key.split_once(':') {
			Some((namespace, id)) => (namespace, id),
			None => ("", key),
		}
	}

	/// Converts a storage key to a filesystem-safe file path.
	///
	/// `namespace:id` maps to `<base>/<namespace>/<id>.bin` with path
	/// separators in either part replaced.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = Self::split_key(key);
		let safe_id = id.replace(['/', ':'], "_");
		if namespace.is_empty() {
			self.base_path.join(format!("{}.bin", safe_id))
		} else {
			let safe_namespace = namespace.replace(['/', ':'], "_");
			self.base_path
				.join(safe_namespace)
				.join(format!("{}.bin", safe_id))
		}
	}

	/// Gets the TTL for a given key based on its namespace.
	fn get_ttl_for_key(&self, key: &str) -> Duration {
		let (namespace, _) = Self::split_key(key);
		self.ttl_config.get_ttl(namespace)
	}

	/// Reads the header of one storage file, if it has a valid one.
	async fn read_header(path: &std::path::Path) -> Option<FileHeader> {
		match fs::read(path).await {
			Ok(data) if data.len() >= FileHeader::SIZE => {
				FileHeader::deserialize(&data[..FileHeader::SIZE]).ok()
			},
			Ok(_) => {
				tracing::debug!("Skipping file {:?}: too small for header", path);
				None
			},
			Err(e) => {
				tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
				None
			},
		}
	}

	/// Removes all expired files from storage.
	async fn cleanup_expired_files(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		let mut pending = vec![self.base_path.clone()];

		while let Some(dir) = pending.pop() {
			let mut entries = fs::read_dir(&dir)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;

			while let Some(entry) = entries
				.next_entry()
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?
			{
				let path = entry.path();
				if path.is_dir() {
					pending.push(path);
				} else if path.extension() == Some(std::ffi::OsStr::new("bin")) {
					if let Some(header) = Self::read_header(&path).await {
						if header.is_expired() {
							if let Err(e) = fs::remove_file(&path).await {
								tracing::warn!("Failed to remove expired file {:?}: {}", path, e);
							} else {
								removed += 1;
							}
						}
					}
				}
			}
		}
		Ok(removed)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		let data = match fs::read(&path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Err(StorageError::NotFound);
		}

		// Return data after header
		if data.len() > FileHeader::SIZE {
			Ok(data[FileHeader::SIZE..].to_vec())
		} else {
			Ok(Vec::new())
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		// Create parent directory if it doesn't exist
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		// Determine TTL: use provided TTL, or get from config based on key
		let ttl = ttl.unwrap_or_else(|| self.get_ttl_for_key(key));

		let header = FileHeader::new(ttl);
		let header_bytes = header.serialize();

		// Combine header and data
		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&header_bytes);
		file_data.extend_from_slice(&value);

		// Write atomically by writing to temp file then renaming
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let path = self.get_file_path(key);
		if !path.exists() {
			return Ok(false);
		}
		match Self::read_header(&path).await {
			Some(header) => Ok(!header.is_expired()),
			None => Ok(false),
		}
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let (namespace, _) = Self::split_key(prefix);
		let dir = if namespace.is_empty() {
			self.base_path.clone()
		} else {
			self.base_path.join(namespace)
		};

		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			let key = if namespace.is_empty() {
				stem.to_string()
			} else {
				format!("{}:{}", namespace, stem)
			};
			if !key.starts_with(prefix) {
				continue;
			}
			// Expired entries are invisible to listing
			if let Some(header) = Self::read_header(&path).await {
				if !header.is_expired() {
					keys.push(key);
				}
			}
		}

		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cleanup_expired_files().await
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![], // No required fields
			vec![Field::new("storage_path", FieldType::String)],
		);
		schema.validate(config)?;

		// ttl_* keys are namespace-driven and cannot be enumerated up front
		if let Some(table) = config.as_table() {
			for (key, value) in table {
				if key.starts_with("ttl_") && value.as_integer().map_or(true, |v| v < 0) {
					return Err(ValidationError::InvalidValue {
						field: key.clone(),
						message: "TTL must be a non-negative integer of seconds".into(),
					});
				}
			}
		}

		Ok(())
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
/// - `ttl_<namespace>`: TTL in seconds for keys under `<namespace>` (default: 0, never)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage")
		.to_string();

	let ttl_config = TtlConfig::from_config(config);

	Ok(Box::new(FileStorage::new(
		PathBuf::from(storage_path),
		ttl_config,
	)))
}

/// Registry entry for the file storage implementation.
pub struct Registry;

impl broker_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn storage(dir: &TempDir) -> FileStorage {
		FileStorage::new(
			dir.path().to_path_buf(),
			TtlConfig {
				ttls: HashMap::new(),
			},
		)
	}

	#[tokio::test]
	async fn test_roundtrip_and_delete() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);

		storage
			.set_bytes("orders:abc", b"payload".to_vec(), None)
			.await
			.unwrap();
		assert!(storage.exists("orders:abc").await.unwrap());
		assert_eq!(
			storage.get_bytes("orders:abc").await.unwrap(),
			b"payload".to_vec()
		);

		storage.delete("orders:abc").await.unwrap();
		assert!(!storage.exists("orders:abc").await.unwrap());
		// Deleting a missing key is not an error
		storage.delete("orders:abc").await.unwrap();
	}

	#[tokio::test]
	async fn test_list_keys_scans_namespace_directory() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);

		storage
			.set_bytes("orders:a", b"a".to_vec(), None)
			.await
			.unwrap();
		storage
			.set_bytes("orders:b", b"b".to_vec(), None)
			.await
			.unwrap();
		storage
			.set_bytes("quotas:c", b"c".to_vec(), None)
			.await
			.unwrap();

		let mut keys = storage.list_keys("orders:").await.unwrap();
		keys.sort();
		assert_eq!(keys, vec!["orders:a".to_string(), "orders:b".to_string()]);

		// A namespace that was never written yields no keys
		assert!(storage.list_keys("missing:").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_expired_file_is_absent_and_cleaned_up() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);

		storage
			.set_bytes("orders:old", b"x".to_vec(), Some(Duration::from_secs(1)))
			.await
			.unwrap();

		// Rewrite the header with an expiry in the past
		let path = storage.get_file_path("orders:old");
		let mut data = std::fs::read(&path).unwrap();
		let mut header = FileHeader::deserialize(&data[..FileHeader::SIZE]).unwrap();
		header.expires_at = now_secs() - 10;
		data[..FileHeader::SIZE].copy_from_slice(&header.serialize());
		std::fs::write(&path, data).unwrap();

		assert!(!storage.exists("orders:old").await.unwrap());
		assert!(matches!(
			storage.get_bytes("orders:old").await,
			Err(StorageError::NotFound)
		));
		assert!(storage.list_keys("orders:").await.unwrap().is_empty());

		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert!(!path.exists());
	}

	#[tokio::test]
	async fn test_header_roundtrip() {
		let header = FileHeader::new(Duration::from_secs(60));
		let bytes = header.serialize();
		let parsed = FileHeader::deserialize(&bytes).unwrap();
		assert_eq!(parsed.magic, *FileHeader::MAGIC);
		assert_eq!(parsed.version, FileHeader::VERSION);
		assert_eq!(parsed.expires_at, header.expires_at);
	}

	#[tokio::test]
	async fn test_unrecognized_file_rejected() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);

		let path = storage.get_file_path("orders:junk");
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, vec![0u8; 128]).unwrap();

		assert!(matches!(
			storage.get_bytes("orders:junk").await,
			Err(StorageError::Backend(_))
		));
	}
}
