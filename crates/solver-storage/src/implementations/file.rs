//! File-based storage backend.
//!
//! Each namespace is a directory and each id a file inside it. Files start
//! with an 8-byte big-endian expiry timestamp (zero for no expiry) followed
//! by the payload. Writes go to a temp file that is then renamed, so a crash
//! never leaves a half-written record behind.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use solver_types::{ConfigSchema, Field, Schema, ValidationError};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;

const HEADER_LEN: usize = 8;
const DEFAULT_NAMESPACE: &str = "default";

pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	fn split_key(key: &str) -> (&str, &str) {
		key.split_once(':').unwrap_or((DEFAULT_NAMESPACE, key))
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = Self::split_key(key);
		self.base_path
			.join(escape(namespace))
			.join(format!("{}.bin", escape(id)))
	}

	async fn read_live(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		if data.len() < HEADER_LEN {
			return Err(StorageError::Backend(format!(
				"Corrupt storage file {}",
				path.display()
			)));
		}
		let mut header = [0u8; HEADER_LEN];
		header.copy_from_slice(&data[..HEADER_LEN]);
		let expires_at = u64::from_be_bytes(header);
		if expires_at != 0 && expires_at <= now_secs() {
			// Lazily drop expired entries.
			if let Err(e) = fs::remove_file(path).await {
				tracing::debug!(path = %path.display(), error = %e, "Failed to remove expired entry");
			}
			return Ok(None);
		}
		Ok(Some(data[HEADER_LEN..].to_vec()))
	}
}

fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default()
}

fn escape(raw: &str) -> String {
	raw.replace('%', "%25")
		.replace('/', "%2F")
		.replace(':', "%3A")
		.replace('\\', "%5C")
}

fn unescape(raw: &str) -> String {
	raw.replace("%5C", "\\")
		.replace("%3A", ":")
		.replace("%2F", "/")
		.replace("%25", "%")
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_live(&self.get_file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let expires_at = ttl.map(|ttl| now_secs() + ttl.as_secs().max(1)).unwrap_or(0);
		let mut contents = Vec::with_capacity(HEADER_LEN + value.len());
		contents.extend_from_slice(&expires_at.to_be_bytes());
		contents.extend_from_slice(&value);

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, contents)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read_live(&self.get_file_path(key)).await?.is_some())
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let (namespace, id_prefix) = Self::split_key(prefix);
		let dir = self.base_path.join(escape(namespace));

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
			let file_name = entry.file_name().to_string_lossy().to_string();
			let Some(escaped_id) = file_name.strip_suffix(".bin") else {
				continue;
			};
			let id = unescape(escaped_id);
			if !id.starts_with(id_prefix) {
				continue;
			}
			if self.read_live(&entry.path()).await?.is_some() {
				keys.push(format!("{}:{}", namespace, id));
			}
		}
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![],
			vec![Field::new("storage_path", solver_types::FieldType::String)],
		)
		.validate(config)
	}
}

/// Creates a file backend.
///
/// Configuration parameters:
/// - `storage_path`: base directory (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}
