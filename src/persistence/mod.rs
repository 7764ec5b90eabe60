//! On-disk snapshot of the committed tool index.
//!
//! A snapshot holds every committed record together with its embedding, so a
//! restart can serve searches without re-embedding the catalog. Snapshots are
//! tied to the embedder that produced them: a different model or dimension
//! requires rebuilding the index.

use crate::error::{AppError, Result};
use crate::index::{Metadata, ToolRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Snapshot format version. Increment when format changes.
const SNAPSHOT_VERSION: u32 = 1;

/// Magic bytes to identify snapshot files.
const SNAPSHOT_MAGIC: &[u8; 8] = b"TOOLSIFT";

/// Upper bound on a single record header, guards against reading garbage lengths.
const MAX_HEADER_BYTES: u32 = 1 << 20;

/// Record fields other than the embedding, stored as JSON.
#[derive(Serialize)]
struct RecordHeaderRef<'a> {
    id: &'a str,
    tool_name: &'a str,
    description: &'a str,
    server_name: &'a str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct RecordHeader {
    id: String,
    tool_name: String,
    description: String,
    server_name: String,
    metadata: Metadata,
}

pub struct IndexSnapshot {
    /// Format version for compatibility checking
    pub version: u32,
    /// SHA256 of the embedder's model id and dimension
    pub embedder_fingerprint: [u8; 32],
    /// SHA256 over every record, detects truncated or corrupted files
    pub records_hash: [u8; 32],
    pub embedding_dim: usize,
    pub records: Vec<ToolRecord>,
}

impl IndexSnapshot {
    pub fn embedder_fingerprint(model_id: &str, embedding_dim: usize) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update(b"|");
        hasher.update((embedding_dim as u64).to_le_bytes());
        hasher.finalize().into()
    }

    /// Hash over each record's encoded header and raw embedding bytes, exactly
    /// as they appear on disk.
    pub fn compute_records_hash(records: &[ToolRecord]) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();

        for record in records {
            let header = encode_header(record)?;
            hash_record(&mut hasher, &header, &record.embedding);
        }

        Ok(hasher.finalize().into())
    }

    pub fn new(model_id: &str, embedding_dim: usize, records: Vec<ToolRecord>) -> Result<Self> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            embedder_fingerprint: Self::embedder_fingerprint(model_id, embedding_dim),
            records_hash: Self::compute_records_hash(&records)?,
            embedding_dim,
            records,
        })
    }

    /// Write the snapshot atomically (temp file + rename).
    ///
    /// File format:
    /// - 8 bytes: magic "TOOLSIFT"
    /// - 4 bytes: version (u32 LE)
    /// - 32 bytes: embedder fingerprint
    /// - 32 bytes: records hash
    /// - 8 bytes: embedding_dim (u64 LE)
    /// - 8 bytes: num_records (u64 LE)
    /// - per record: header length (u32 LE), JSON header, embedding (f32 LE × dim)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(unavailable("Failed to create index directory"))?;
            }
        }

        let tmp_path = temp_path_for(path);
        let file = File::create(&tmp_path).map_err(unavailable("Failed to create snapshot file"))?;
        let mut writer = BufWriter::new(file);

        let written = self.write_to(&mut writer).and_then(|_| {
            writer
                .flush()
                .map_err(unavailable("Failed to flush snapshot file"))
        });

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        drop(writer);

        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            AppError::IndexUnavailable(format!("Failed to replace snapshot: {}", e))
        })?;

        tracing::info!(
            path = %path.display(),
            num_records = self.records.len(),
            embedding_dim = self.embedding_dim,
            "Index snapshot saved"
        );

        Ok(())
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let write_err = unavailable("Failed to write snapshot");

        writer.write_all(SNAPSHOT_MAGIC).map_err(&write_err)?;
        writer
            .write_all(&self.version.to_le_bytes())
            .map_err(&write_err)?;
        writer
            .write_all(&self.embedder_fingerprint)
            .map_err(&write_err)?;
        writer.write_all(&self.records_hash).map_err(&write_err)?;
        writer
            .write_all(&(self.embedding_dim as u64).to_le_bytes())
            .map_err(&write_err)?;
        writer
            .write_all(&(self.records.len() as u64).to_le_bytes())
            .map_err(&write_err)?;

        for record in &self.records {
            if record.embedding.len() != self.embedding_dim {
                return Err(AppError::ValidationError(format!(
                    "Record '{}' has embedding dimension {}, expected {}",
                    record.id,
                    record.embedding.len(),
                    self.embedding_dim
                )));
            }

            let header = encode_header(record)?;

            writer
                .write_all(&(header.len() as u32).to_le_bytes())
                .map_err(&write_err)?;
            writer.write_all(&header).map_err(&write_err)?;
            for &val in &record.embedding {
                writer.write_all(&val.to_le_bytes()).map_err(&write_err)?;
            }
        }

        Ok(())
    }

    /// Read the snapshot written for this embedder. Returns None if the file
    /// doesn't exist.
    ///
    /// The header is checked before any record is read: a snapshot from a
    /// different embedder is a `ValidationError` (rebuild the index), and a
    /// dimension field that disagrees with a matching fingerprint is treated as
    /// corruption.
    pub fn load(path: &Path, model_id: &str, expected_dim: usize) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Snapshot file does not exist");
            return Ok(None);
        }

        let file = File::open(path).map_err(unavailable("Failed to open snapshot file"))?;
        let mut reader = BufReader::new(file);
        let read_err = unavailable("Failed to read snapshot");

        let mut magic = [0u8; 8];
        if reader.read_exact(&mut magic).is_err() || &magic != SNAPSHOT_MAGIC {
            return Err(AppError::IndexUnavailable(format!(
                "{} is not a tool index snapshot",
                path.display()
            )));
        }

        let version = read_u32(&mut reader).map_err(&read_err)?;
        if version != SNAPSHOT_VERSION {
            return Err(AppError::IndexUnavailable(format!(
                "Snapshot version {} is not supported (expected {})",
                version, SNAPSHOT_VERSION
            )));
        }

        let mut embedder_fingerprint = [0u8; 32];
        reader
            .read_exact(&mut embedder_fingerprint)
            .map_err(&read_err)?;
        let mut records_hash = [0u8; 32];
        reader.read_exact(&mut records_hash).map_err(&read_err)?;

        let declared_dim = read_u64(&mut reader).map_err(&read_err)?;
        let num_records = read_u64(&mut reader).map_err(&read_err)? as usize;

        if embedder_fingerprint != Self::embedder_fingerprint(model_id, expected_dim) {
            return Err(AppError::ValidationError(format!(
                "Snapshot {} was built with a different embedder (dimension {}); rebuild the index",
                path.display(),
                declared_dim
            )));
        }
        if declared_dim != expected_dim as u64 {
            return Err(AppError::IndexUnavailable(format!(
                "Snapshot {} header declares dimension {} for a {}-dimensional embedder",
                path.display(),
                declared_dim,
                expected_dim
            )));
        }
        let embedding_dim = expected_dim;

        let mut hasher = Sha256::new();
        let mut records = Vec::with_capacity(num_records.min(1 << 16));
        for _ in 0..num_records {
            let header_len = read_u32(&mut reader).map_err(&read_err)?;
            if header_len > MAX_HEADER_BYTES {
                return Err(AppError::IndexUnavailable(format!(
                    "Snapshot record header too large ({} bytes)",
                    header_len
                )));
            }

            let mut header_bytes = vec![0u8; header_len as usize];
            reader.read_exact(&mut header_bytes).map_err(&read_err)?;
            let header: RecordHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
                AppError::IndexUnavailable(format!("Corrupt snapshot record: {}", e))
            })?;

            let mut embedding = vec![0f32; embedding_dim];
            for val in &mut embedding {
                let mut bytes = [0u8; 4];
                reader.read_exact(&mut bytes).map_err(&read_err)?;
                *val = f32::from_le_bytes(bytes);
            }
            hash_record(&mut hasher, &header_bytes, &embedding);

            records.push(ToolRecord {
                id: header.id,
                tool_name: header.tool_name,
                description: header.description,
                server_name: header.server_name,
                embedding,
                metadata: header.metadata,
            });
        }

        let computed: [u8; 32] = hasher.finalize().into();
        if computed != records_hash {
            return Err(AppError::IndexUnavailable(format!(
                "Snapshot {} failed its integrity check",
                path.display()
            )));
        }

        tracing::info!(
            path = %path.display(),
            num_records,
            embedding_dim,
            "Index snapshot loaded"
        );

        Ok(Some(Self {
            version,
            embedder_fingerprint,
            records_hash,
            embedding_dim,
            records,
        }))
    }
}

/// Load the records persisted at `path` for the given embedder.
///
/// A missing file yields no records. A snapshot written by a different
/// embedder is rejected: the index must be rebuilt.
pub fn load_records(path: &Path, model_id: &str, embedding_dim: usize) -> Result<Vec<ToolRecord>> {
    Ok(IndexSnapshot::load(path, model_id, embedding_dim)?
        .map(|snapshot| snapshot.records)
        .unwrap_or_default())
}

/// Persist `records` at `path` for the given embedder.
pub fn save_records(
    path: &Path,
    model_id: &str,
    embedding_dim: usize,
    records: Vec<ToolRecord>,
) -> Result<()> {
    IndexSnapshot::new(model_id, embedding_dim, records)?.save(path)
}

fn encode_header(record: &ToolRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(&RecordHeaderRef {
        id: &record.id,
        tool_name: &record.tool_name,
        description: &record.description,
        server_name: &record.server_name,
        metadata: &record.metadata,
    })
    .map_err(|e| AppError::ValidationError(format!("Failed to encode record: {}", e)))
}

fn hash_record(hasher: &mut Sha256, header: &[u8], embedding: &[f32]) {
    hasher.update((header.len() as u32).to_le_bytes());
    hasher.update(header);
    for val in embedding {
        hasher.update(val.to_le_bytes());
    }
}

fn unavailable(context: &'static str) -> impl Fn(std::io::Error) -> AppError {
    move |e| AppError::IndexUnavailable(format!("{}: {}", context, e))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
    path.with_file_name(name)
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_record(name: &str, embedding: Vec<f32>) -> ToolRecord {
        let metadata = json!({
            "category": "mathematics",
            "parameters": ["a: int", "b: int"],
            "nested": {"weight": 1.5, "flag": true}
        });
        ToolRecord::new(name, "math", format!("{} numbers", name))
            .with_embedding(embedding)
            .with_metadata(metadata.as_object().cloned().unwrap())
    }

    #[test]
    fn test_records_hash_changes_with_records() {
        let a = vec![make_record("add", vec![1.0, 0.0])];
        let b = vec![make_record("add", vec![0.0, 1.0])];
        assert_ne!(
            IndexSnapshot::compute_records_hash(&a).unwrap(),
            IndexSnapshot::compute_records_hash(&b).unwrap()
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let records = vec![
            make_record("add", vec![1.0, 2.0, 3.0]),
            make_record("multiply", vec![4.0, 5.0, 6.0]),
        ];
        save_records(&path, "test-model", 3, records.clone()).unwrap();

        let loaded = load_records(&path, "test-model", 3).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let loaded = load_records(&dir.path().join("absent.bin"), "m", 3).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_different_embedder_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_records(&path, "model-a", 2, vec![make_record("add", vec![1.0, 0.0])]).unwrap();

        assert!(matches!(
            load_records(&path, "model-b", 2),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_garbage_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        fs::write(&path, b"not a snapshot at all").unwrap();

        assert!(matches!(
            IndexSnapshot::load(&path, "m", 2),
            Err(AppError::IndexUnavailable(_))
        ));
    }

    #[test]
    fn test_truncated_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_records(&path, "m", 2, vec![make_record("add", vec![1.0, 0.0])]).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        assert!(matches!(
            IndexSnapshot::load(&path, "m", 2),
            Err(AppError::IndexUnavailable(_))
        ));
    }

    #[test]
    fn test_different_dimension_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_records(&path, "m", 2, vec![make_record("add", vec![1.0, 0.0])]).unwrap();

        assert!(matches!(
            load_records(&path, "m", 3),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_corrupt_dimension_field_is_rejected_before_reading_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_records(&path, "m", 2, vec![make_record("add", vec![1.0, 0.0])]).unwrap();

        // magic(8) + version(4) + fingerprint(32) + records hash(32)
        let mut bytes = fs::read(&path).unwrap();
        bytes[76..84].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let err = load_records(&path, "m", 2).unwrap_err();
        assert!(matches!(err, AppError::IndexUnavailable(_)));
        assert!(err.to_string().contains("18446744073709551615"));
    }

    #[test]
    fn test_wrong_dimension_record_rejected_on_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let result = save_records(&path, "m", 3, vec![make_record("add", vec![1.0])]);

        assert!(result.is_err());
        assert!(!path.exists());
    }
}
