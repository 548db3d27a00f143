use crate::store::{Store, StoreError};
use blake3::Hasher;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Blake3 hex digest of a byte slice
pub fn fingerprint_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Blake3 hex digest of everything `reader` yields
pub fn fingerprint_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; 512 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash a file's content off the async runtime
pub async fn fingerprint_file(path: impl AsRef<Path>) -> io::Result<String> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_reader(File::open(path)?))
        .await
        .map_err(io::Error::other)?
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unique,
    /// Same content as this earlier file.
    Duplicate(Uuid),
}

/// Detects files whose content already exists in the same library
pub struct Deduper {
    store: Arc<dyn Store>,
}

impl Deduper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn evaluate(
        &self,
        library: Uuid,
        fingerprint: &str,
        file: Uuid,
    ) -> Result<Verdict, StoreError> {
        let existing = self
            .store
            .find_by_fingerprint(library, fingerprint, file)
            .await?;
        Ok(match existing {
            Some(original) => Verdict::Duplicate(original.duplicate_of.unwrap_or(original.uid)),
            None => Verdict::Unique,
        })
    }
}
