//! Stream catalog: canonical stream identity and its persistent registry.
//!
//! A stream is identified by a metric name plus an unordered set of labels.
//! [`StreamKey`] canonicalizes that identity by sorting labels by key, so
//! `cpu{host="a",zone="b"}` and `cpu{zone="b",host="a"}` name the same
//! stream. The [`Catalog`] maps canonical keys to [`StreamInfo`] records and
//! persists them as `catalog.json` in the connection root.
//!
//! # Lookup
//!
//! - [`Catalog::resolve`] is an exact identity lookup and is what queries,
//!   inserters and existence checks use.
//! - [`Catalog::matching`] treats the selector's labels as a subset filter.
//!   It is not used by query resolution.
//!
//! # Example
//!
//! ```rust
//! use strata::catalog::{Catalog, StreamKey};
//! use strata::value::ValueKind;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let mut catalog = Catalog::open(dir.path())?;
//!
//! let key = StreamKey::parse(r#"cpu{zone="b",host="a"}"#)?;
//! let (info, created) = catalog.create(&key, ValueKind::Float)?;
//! assert!(created);
//! assert_eq!(info.canonical, r#"cpu{host="a",zone="b"}"#);
//!
//! let same = StreamKey::parse(r#"cpu{host="a",zone="b"}"#)?;
//! assert_eq!(catalog.resolve(&same).map(|info| info.id), Some(info.id));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result, StorageError};
use crate::query::ast::{Selector, escape_label_value};
use crate::query::parser::parse_selector;
use crate::value::ValueKind;

/// File name of the persisted catalog inside the connection root.
pub const CATALOG_FILE: &str = "catalog.json";

/// Current catalog file format version.
const CATALOG_VERSION: u32 = 1;

/// Sequential identifier of a stream, stable across reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical identity of a stream: a name and labels sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl StreamKey {
    /// Builds a key from a name and labels in any order.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::InvalidName`] if the name is empty
    /// - [`CatalogError::InvalidLabel`] for an empty key, a reserved `__`
    ///   prefix, or a repeated key
    pub fn new(name: impl Into<String>, labels: &[(String, String)]) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CatalogError::InvalidName {
                name,
                reason: "name cannot be empty".to_string(),
            }
            .into());
        }

        let mut sorted = labels.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        for (i, (key, value)) in sorted.iter().enumerate() {
            let reason = if key.is_empty() {
                Some("key cannot be empty")
            } else if key.starts_with("__") {
                Some("keys starting with '__' are reserved")
            } else if i > 0 && sorted[i - 1].0 == *key {
                Some("duplicate key")
            } else {
                None
            };

            if let Some(reason) = reason {
                return Err(CatalogError::InvalidLabel {
                    key: key.clone(),
                    value: value.clone(),
                    reason: reason.to_string(),
                }
                .into());
            }
        }

        Ok(Self {
            name,
            labels: sorted,
        })
    }

    /// Builds a key from a parsed selector.
    ///
    /// # Errors
    ///
    /// See [`StreamKey::new`].
    pub fn from_selector(selector: &Selector) -> Result<Self> {
        Self::new(selector.name.clone(), &selector.labels)
    }

    /// Parses a bare selector string such as `cpu{host="a"}`.
    ///
    /// # Errors
    ///
    /// Returns a syntax error for malformed input or an aggregate wrapper,
    /// and the validation errors of [`StreamKey::new`].
    pub fn parse(selector: &str) -> Result<Self> {
        Self::from_selector(&parse_selector(selector)?)
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Labels sorted by key.
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// Returns `true` if every label of `self` is present in `other` with
    /// the same value and the names are equal.
    pub fn is_subset_of(&self, other: &StreamKey) -> bool {
        self.name == other.name
            && self.labels.iter().all(|(key, value)| {
                other
                    .labels
                    .binary_search_by(|(k, _)| k.cmp(key))
                    .is_ok_and(|i| other.labels[i].1 == *value)
            })
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (key, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}=\"{}\"", escape_label_value(value))?;
        }
        f.write_str("}")
    }
}

/// Metadata of a registered stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Sequential identifier.
    pub id: StreamId,
    /// Metric name.
    pub name: String,
    /// Labels sorted by key.
    pub labels: Vec<(String, String)>,
    /// The value kind fixed at creation.
    pub kind: ValueKind,
    /// Canonical selector string.
    pub canonical: String,
}

impl StreamInfo {
    /// Rebuilds the canonical key of this stream.
    ///
    /// # Errors
    ///
    /// Fails only if the record was not produced by [`StreamKey`]
    /// validation.
    pub fn key(&self) -> Result<StreamKey> {
        StreamKey::new(self.name.clone(), &self.labels)
    }
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    next_id: u64,
    streams: Vec<StreamInfo>,
}

/// Registry of every stream under a connection root.
///
/// The catalog holds metadata only; point stores are owned by the
/// connection. It is not internally synchronized.
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    entries: HashMap<StreamKey, StreamInfo>,
    next_id: u64,
}

impl Catalog {
    /// Opens the catalog stored in `root`, or starts an empty one if the
    /// file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadFailed`] if the file exists but cannot be
    /// read, or [`CatalogError::Corrupted`] if its contents are invalid.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let path = root.as_ref().join(CATALOG_FILE);
        if !path.exists() {
            return Ok(Self {
                path,
                entries: HashMap::new(),
                next_id: 0,
            });
        }

        let json = std::fs::read_to_string(&path).map_err(|source| StorageError::ReadFailed {
            path: path.clone(),
            source,
        })?;

        let corrupted = |reason: String| CatalogError::Corrupted {
            path: path.clone(),
            reason,
        };

        let file: CatalogFile =
            serde_json::from_str(&json).map_err(|err| corrupted(err.to_string()))?;

        if file.version != CATALOG_VERSION {
            return Err(corrupted(format!(
                "unsupported version: expected {CATALOG_VERSION}, found {}",
                file.version
            ))
            .into());
        }

        let mut entries = HashMap::with_capacity(file.streams.len());
        for info in file.streams {
            let key = info
                .key()
                .map_err(|err| corrupted(format!("stream {}: {err}", info.id)))?;
            if key.to_string() != info.canonical {
                return Err(corrupted(format!(
                    "stream {} canonical form {:?} does not match its labels",
                    info.id, info.canonical
                ))
                .into());
            }
            if info.id.0 >= file.next_id {
                return Err(corrupted(format!(
                    "stream id {} is not below next id {}",
                    info.id, file.next_id
                ))
                .into());
            }
            if entries.insert(key, info).is_some() {
                return Err(corrupted("duplicate stream identity".to_string()).into());
            }
        }

        tracing::debug!("loaded catalog {} with {} stream(s)", path.display(), entries.len());

        Ok(Self {
            path,
            entries,
            next_id: file.next_id,
        })
    }

    /// Registers a stream, or returns the existing one if the identity and
    /// kind match.
    ///
    /// The returned flag is `true` if a new stream was created. New entries
    /// are persisted before this returns.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::AlreadyExists`] if the identity exists with a
    ///   different kind
    /// - a storage error if the catalog file cannot be written
    pub fn create(&mut self, key: &StreamKey, kind: ValueKind) -> Result<(StreamInfo, bool)> {
        if let Some(existing) = self.entries.get(key) {
            if existing.kind != kind {
                return Err(CatalogError::AlreadyExists {
                    selector: existing.canonical.clone(),
                    existing: existing.kind,
                    requested: kind,
                }
                .into());
            }
            return Ok((existing.clone(), false));
        }

        let info = StreamInfo {
            id: StreamId(self.next_id),
            name: key.name.clone(),
            labels: key.labels.clone(),
            kind,
            canonical: key.to_string(),
        };

        self.entries.insert(key.clone(), info.clone());
        self.next_id += 1;

        if let Err(err) = self.save() {
            self.entries.remove(key);
            self.next_id -= 1;
            return Err(err);
        }

        tracing::debug!("created stream {} ({kind}) with id {}", info.canonical, info.id.0);
        Ok((info, true))
    }

    /// The id the next created stream will get.
    pub fn next_id(&self) -> StreamId {
        StreamId(self.next_id)
    }

    /// Exact identity lookup.
    pub fn resolve(&self, key: &StreamKey) -> Option<&StreamInfo> {
        self.entries.get(key)
    }

    /// Returns `true` if a stream with exactly this identity exists.
    pub fn exists(&self, key: &StreamKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns every stream whose labels include all of `selector`'s labels,
    /// sorted by id.
    pub fn matching(&self, selector: &StreamKey) -> Vec<&StreamInfo> {
        let mut matches: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| selector.is_subset_of(key))
            .map(|(_, info)| info)
            .collect();
        matches.sort_by_key(|info| info.id);
        matches
    }

    /// Returns every stream sorted by id.
    pub fn list(&self) -> Vec<StreamInfo> {
        let mut streams: Vec<_> = self.entries.values().cloned().collect();
        streams.sort_by_key(|info| info.id);
        streams
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no stream is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the catalog atomically: temp file, fsync, rename.
    fn save(&self) -> Result<()> {
        let file = CatalogFile {
            version: CATALOG_VERSION,
            next_id: self.next_id,
            streams: self.list(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(StorageError::Serialize)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let write_failed = |source| StorageError::WriteFailed {
            path: tmp_path.clone(),
            source,
        };

        let mut tmp = File::create(&tmp_path).map_err(write_failed)?;
        tmp.write_all(&json).map_err(write_failed)?;
        tmp.sync_all().map_err(write_failed)?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path).map_err(|source| StorageError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            crate::segment::sync_dir(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StrataError};

    fn labels(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_canonicalization() {
        let a = StreamKey::new("cpu", &labels(&[("zone", "b"), ("host", "a")])).unwrap();
        let b = StreamKey::parse(r#"cpu { host = 'a', zone = "b" }"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"cpu{host="a",zone="b"}"#);

        assert_eq!(StreamKey::parse("up{}").unwrap(), StreamKey::parse("up").unwrap());
        assert_eq!(StreamKey::parse("up").unwrap().to_string(), "up");
    }

    #[test]
    fn test_key_escapes_values() {
        let key = StreamKey::new("m", &labels(&[("path", r#"a"b\c"#)])).unwrap();
        assert_eq!(key.to_string(), r#"m{path="a\"b\\c"}"#);
        assert_eq!(StreamKey::parse(&key.to_string()).unwrap(), key);
    }

    #[test]
    fn test_key_validation() {
        let err = StreamKey::new("", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = StreamKey::new("cpu", &labels(&[("__name__", "x")])).unwrap_err();
        assert!(matches!(
            err,
            StrataError::Catalog(CatalogError::InvalidLabel { .. })
        ));

        assert!(StreamKey::new("cpu", &labels(&[("", "x")])).is_err());
        assert!(StreamKey::new("cpu", &labels(&[("a", "1"), ("a", "2")])).is_err());

        let err = StreamKey::parse("sum(cpu)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_create_is_idempotent_per_kind() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(temp_dir.path()).unwrap();
        let key = StreamKey::parse(r#"test_stream{test="asdf"}"#).unwrap();

        let (first, created) = catalog.create(&key, ValueKind::UnsignedInteger).unwrap();
        assert!(created);
        assert_eq!(first.id, StreamId(0));

        let (second, created) = catalog.create(&key, ValueKind::UnsignedInteger).unwrap();
        assert!(!created);
        assert_eq!(second, first);

        let err = catalog.create(&key, ValueKind::Float).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_resolve_is_exact() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(temp_dir.path()).unwrap();
        let full = StreamKey::parse(r#"cpu{host="a",zone="b"}"#).unwrap();
        catalog.create(&full, ValueKind::Float).unwrap();

        let partial = StreamKey::parse(r#"cpu{host="a"}"#).unwrap();
        assert!(catalog.exists(&full));
        assert!(!catalog.exists(&partial));
        assert!(catalog.resolve(&partial).is_none());
    }

    #[test]
    fn test_matching_is_subset() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(temp_dir.path()).unwrap();
        for selector in [
            r#"cpu{host="a",zone="b"}"#,
            r#"cpu{host="a",zone="c"}"#,
            r#"cpu{host="b"}"#,
            r#"mem{host="a"}"#,
        ] {
            catalog
                .create(&StreamKey::parse(selector).unwrap(), ValueKind::Float)
                .unwrap();
        }

        let filter = StreamKey::parse(r#"cpu{host="a"}"#).unwrap();
        let names: Vec<_> = catalog
            .matching(&filter)
            .iter()
            .map(|info| info.canonical.clone())
            .collect();
        assert_eq!(
            names,
            vec![r#"cpu{host="a",zone="b"}"#, r#"cpu{host="a",zone="c"}"#]
        );

        assert_eq!(catalog.matching(&StreamKey::parse("cpu").unwrap()).len(), 3);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let mut catalog = Catalog::open(temp_dir.path()).unwrap();
            catalog
                .create(&StreamKey::parse("a").unwrap(), ValueKind::SignedInteger)
                .unwrap();
            catalog
                .create(&StreamKey::parse(r#"b{x="1"}"#).unwrap(), ValueKind::Float)
                .unwrap();
        }

        let mut catalog = Catalog::open(temp_dir.path()).unwrap();
        let streams = catalog.list();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].canonical, "a");
        assert_eq!(streams[0].kind, ValueKind::SignedInteger);
        assert_eq!(streams[1].id, StreamId(1));

        let (info, created) = catalog
            .create(&StreamKey::parse("c").unwrap(), ValueKind::Float)
            .unwrap();
        assert!(created);
        assert_eq!(info.id, StreamId(2));
        assert!(!temp_dir.path().join("catalog.json.tmp").exists());
    }

    #[test]
    fn test_corrupted_catalog() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join(CATALOG_FILE), "{ not json").unwrap();
        let err = Catalog::open(temp_dir.path()).unwrap_err();
        assert!(matches!(err, StrataError::Catalog(CatalogError::Corrupted { .. })));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
