//! On-disk memo of per-identity feature arrays.
//!
//! Each entry stores its [`CacheKey`] next to the value; an entry is only
//! returned when the stored key equals the requested one.

use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pose::encode_hex;

/// Everything a cached feature set depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub video: String,
    pub identity: usize,
    pub fingerprint: String,
    pub feature_set_version: u32,
    /// Generator names in extraction order
    pub generators: Vec<String>,
    /// `None` for per-frame entries
    pub window_size: Option<usize>,
    pub fps_bits: u64,
    pub pixel_scale_bits: u64,
    pub num_frames: usize,
}

#[derive(Serialize)]
struct EntryRef<'a, T> {
    key: &'a CacheKey,
    value: &'a T,
}

#[derive(Deserialize)]
struct Entry<T> {
    key: CacheKey,
    value: T,
}

#[derive(Debug, Clone)]
pub struct FeatureCache {
    root: PathBuf,
}

impl FeatureCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<video dir>/<identity>/per_frame.bin` or `window_<size>.bin`
    ///
    /// The video directory is the safe name followed by a short digest of
    /// the raw name, so names that only differ in punctuation stay apart.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let file = match key.window_size {
            Some(size) => format!("window_{size}.bin"),
            None => "per_frame.bin".to_string(),
        };
        self.root
            .join(video_dir_name(&key.video))
            .join(key.identity.to_string())
            .join(file)
    }

    /// `Ok(None)` when there is no entry. An entry that cannot be decoded or
    /// was written for a different key is [`Error::CacheCorruption`].
    pub fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };

        // decoding from a slice bounds every length prefix by the file size
        let entry: Entry<T> = bincode::deserialize(&bytes).map_err(|e| {
            Error::CacheCorruption {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;

        if entry.key != *key {
            let reason = if entry.key.fingerprint != key.fingerprint {
                "pose fingerprint changed".to_string()
            } else if entry.key.feature_set_version != key.feature_set_version {
                format!(
                    "feature set version {} != {}",
                    entry.key.feature_set_version, key.feature_set_version
                )
            } else {
                "key mismatch".to_string()
            };
            return Err(Error::CacheCorruption { path, reason });
        }

        debug!(path = %path.display(), "feature cache hit");
        Ok(Some(entry.value))
    }

    /// Write an entry through a temporary file in the same directory and
    /// rename it into place.
    pub fn store<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let path = self.entry_path(key);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            bincode::serialize_into(&mut writer, &EntryRef { key, value }).map_err(|e| {
                Error::CacheCorruption {
                    path: path.clone(),
                    reason: format!("encoding failed: {e}"),
                }
            })?;
            writer.flush().map_err(|e| Error::io(tmp.path(), e))?;
        }
        tmp.persist(&path).map_err(|e| Error::io(&path, e.error))?;

        debug!(path = %path.display(), "feature cache stored");
        Ok(())
    }
}

fn video_dir_name(video: &str) -> String {
    let digest = Sha256::digest(video.as_bytes());
    format!("{}_{}", to_safe_name(video), encode_hex(&digest[..4]))
}

/// Replace every run of characters other than ASCII letters and digits with
/// a single `_`, dropping any trailing `_`.
pub fn to_safe_name(name: &str) -> String {
    let mut safe = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            safe.push(c);
        } else if !safe.ends_with('_') {
            safe.push('_');
        }
    }
    while safe.ends_with('_') {
        safe.pop();
    }
    safe
}
