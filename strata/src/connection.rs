//! The root handle of a strata database.
//!
//! A [`Connection`] owns the directory layout, the [`Catalog`] and one
//! [`PointStore`] per stream. Inserters and statements only hold weak
//! references to streams, so closing the connection invalidates them.
//!
//! # File Layout
//!
//! ```text
//! root/
//! ├── catalog.json            <- stream identities and kinds
//! └── streams/
//!     ├── stream_0/           <- segments of stream 0
//!     │   ├── segment_00000000.seg
//!     │   └── ...
//!     └── stream_1/
//! ```
//!
//! # Example
//!
//! ```rust
//! use strata::{Connection, ValueKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let connection = Connection::open(dir.path())?;
//!
//! connection.create_stream(r#"cpu{host="web1"}"#, ValueKind::Float)?;
//! let mut inserter = connection.inserter(r#"cpu{host="web1"}"#)?;
//! inserter.insert_float(1, 0.25)?;
//! inserter.insert_float(2, 0.75)?;
//! inserter.close()?;
//!
//! let points: Vec<_> = connection
//!     .prepare(r#"cpu{host="web1"}"#, None, None)?
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(points.len(), 2);
//!
//! connection.close()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::{Catalog, StreamId, StreamInfo, StreamKey};
use crate::config::Options;
use crate::error::{CatalogError, Result, StorageError, StrataError};
use crate::inserter::Inserter;
use crate::query::planner;
use crate::statement::Statement;
use crate::store::{PointStore, StoreStats};
use crate::value::{Timestamp, ValueKind};

/// Directory under the root holding one subdirectory per stream.
const STREAMS_DIR: &str = "streams";

/// A registered stream together with its point store.
#[derive(Debug)]
pub struct Stream {
    info: StreamInfo,
    store: PointStore,
}

impl Stream {
    /// Catalog metadata.
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Stream identifier.
    pub fn id(&self) -> StreamId {
        self.info.id
    }

    /// Declared value kind.
    pub fn kind(&self) -> ValueKind {
        self.info.kind
    }

    /// The stream's point store.
    pub fn store(&self) -> &PointStore {
        &self.store
    }
}

#[derive(Debug)]
struct Registry {
    catalog: Catalog,
    streams: HashMap<StreamId, Arc<Stream>>,
    closed: bool,
}

/// An open database rooted at a directory.
///
/// All methods take `&self`; a connection can be shared between threads
/// behind an `Arc`. Stream creation takes an exclusive lock on the catalog,
/// everything else a shared one.
#[derive(Debug)]
pub struct Connection {
    root: PathBuf,
    options: Options,
    registry: RwLock<Registry>,
}

impl Connection {
    /// Opens or creates a database at `root` with default options.
    ///
    /// # Errors
    ///
    /// See [`Connection::open_with_options`].
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open_with_options(root, Options::default())
    }

    /// Opens or creates a database at `root`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Invalid`](crate::error::ConfigError::Invalid) if the
    ///   options do not validate
    /// - [`StorageError::DirectoryAccess`] if the root cannot be created
    /// - catalog and segment errors from loading existing data
    pub fn open_with_options<P: AsRef<Path>>(root: P, options: Options) -> Result<Self> {
        options.validate()?;

        let root = root.as_ref().to_path_buf();
        let streams_dir = root.join(STREAMS_DIR);
        std::fs::create_dir_all(&streams_dir).map_err(|source| StorageError::DirectoryAccess {
            path: streams_dir.clone(),
            source,
        })?;

        let catalog = Catalog::open(&root)?;
        let mut streams = HashMap::with_capacity(catalog.len());
        for info in catalog.list() {
            let store = PointStore::open(stream_dir(&root, info.id), info.kind, &options)?;
            streams.insert(info.id, Arc::new(Stream { info, store }));
        }

        tracing::info!(
            "opened {} with {} stream(s)",
            root.display(),
            streams.len()
        );

        Ok(Self {
            root,
            options,
            registry: RwLock::new(Registry {
                catalog,
                streams,
                closed: false,
            }),
        })
    }

    /// The database root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The options this connection was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns `true` once [`Connection::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    /// Creates a stream from a bare selector such as `cpu{host="a"}`.
    ///
    /// Creating a stream that already exists with the same kind succeeds and
    /// returns the existing stream.
    ///
    /// # Errors
    ///
    /// - syntax and validation errors for the selector
    /// - [`CatalogError::AlreadyExists`] if the stream exists with a
    ///   different kind
    /// - [`StrataError::UseAfterClose`] after [`Connection::close`]
    pub fn create_stream(&self, selector: &str, kind: ValueKind) -> Result<StreamInfo> {
        self.get_or_create_stream(selector, kind).map(|(info, _)| info)
    }

    /// Returns the stream named by `selector`, creating it with `kind` if it
    /// does not exist. The flag is `true` if the stream was created.
    ///
    /// # Errors
    ///
    /// See [`Connection::create_stream`].
    pub fn get_or_create_stream(
        &self,
        selector: &str,
        kind: ValueKind,
    ) -> Result<(StreamInfo, bool)> {
        let key = StreamKey::parse(selector)?;
        let mut registry = self.write()?;

        // the store is opened before the catalog entry is persisted, so a
        // failed open leaves no stream behind
        if !registry.catalog.exists(&key) {
            let id = registry.catalog.next_id();
            let store = PointStore::open(stream_dir(&self.root, id), kind, &self.options)?;
            let (info, created) = registry.catalog.create(&key, kind)?;
            registry.streams.insert(
                info.id,
                Arc::new(Stream {
                    info: info.clone(),
                    store,
                }),
            );
            return Ok((info, created));
        }

        let (info, created) = registry.catalog.create(&key, kind)?;
        if !registry.streams.contains_key(&info.id) {
            let store = PointStore::open(stream_dir(&self.root, info.id), kind, &self.options)?;
            registry.streams.insert(
                info.id,
                Arc::new(Stream {
                    info: info.clone(),
                    store,
                }),
            );
        }
        Ok((info, created))
    }

    /// Returns `true` if a stream with exactly this identity exists.
    ///
    /// # Errors
    ///
    /// Syntax and validation errors for the selector, or
    /// [`StrataError::UseAfterClose`].
    pub fn stream_exists(&self, selector: &str) -> Result<bool> {
        let key = StreamKey::parse(selector)?;
        Ok(self.read()?.catalog.exists(&key))
    }

    /// Every stream, sorted by id.
    ///
    /// # Errors
    ///
    /// [`StrataError::UseAfterClose`].
    pub fn streams(&self) -> Result<Vec<StreamInfo>> {
        Ok(self.read()?.catalog.list())
    }

    /// Streams whose labels include every label of `selector`.
    ///
    /// Queries never use this; they resolve by exact identity.
    ///
    /// # Errors
    ///
    /// Syntax and validation errors for the selector, or
    /// [`StrataError::UseAfterClose`].
    pub fn matching_streams(&self, selector: &str) -> Result<Vec<StreamInfo>> {
        let key = StreamKey::parse(selector)?;
        Ok(self
            .read()?
            .catalog
            .matching(&key)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Storage statistics of every stream, sorted by id.
    ///
    /// # Errors
    ///
    /// [`StrataError::UseAfterClose`].
    pub fn stream_stats(&self) -> Result<Vec<(StreamInfo, StoreStats)>> {
        let registry = self.read()?;
        let mut stats: Vec<_> = registry
            .streams
            .values()
            .map(|stream| (stream.info.clone(), stream.store.stats()))
            .collect();
        stats.sort_by_key(|(info, _)| info.id);
        Ok(stats)
    }

    /// Opens an inserter on an existing stream.
    ///
    /// # Errors
    ///
    /// - syntax and validation errors for the selector
    /// - [`CatalogError::StreamNotFound`] if no stream has this identity
    /// - [`StrataError::UseAfterClose`]
    pub fn inserter(&self, selector: &str) -> Result<Inserter> {
        let key = StreamKey::parse(selector)?;
        let stream = self.resolve_stream(&key)?;
        Ok(Inserter::new(&stream, self.options.inserter_batch_size))
    }

    /// Prepares `query` over `[start, end)`.
    ///
    /// A `None` start means 0; a `None` end means unbounded.
    ///
    /// # Errors
    ///
    /// Syntax, unknown aggregate, stream not found and invalid range, in
    /// that order, or [`StrataError::UseAfterClose`].
    pub fn prepare(
        &self,
        query: &str,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<Statement> {
        let (plan, stream) = planner::plan(query, start, end, |key| self.resolve_stream(key))?;
        Statement::new(plan, &stream)
    }

    /// Flushes every stream's write buffer.
    ///
    /// Every store is attempted; the first error is returned.
    ///
    /// # Errors
    ///
    /// A storage error from any flush, or [`StrataError::UseAfterClose`].
    pub fn flush_all(&self) -> Result<()> {
        let registry = self.read()?;
        flush_streams(registry.streams.values())
    }

    /// Flushes every stream and closes the connection.
    ///
    /// Points still in the local batches of open inserters are flushed with
    /// the rest. Outstanding inserters and statements fail with
    /// [`StrataError::UseAfterClose`] afterwards. The connection is closed
    /// even if a flush fails.
    ///
    /// # Errors
    ///
    /// The first flush error, or [`StrataError::UseAfterClose`] if already
    /// closed.
    pub fn close(&self) -> Result<()> {
        let mut registry = self.write()?;
        let result = flush_streams(registry.streams.values());
        registry.streams.clear();
        registry.closed = true;
        tracing::info!("closed {}", self.root.display());
        result
    }

    /// Exact-identity resolution to a live stream handle.
    pub(crate) fn resolve_stream(&self, key: &StreamKey) -> Result<Arc<Stream>> {
        let registry = self.read()?;
        registry
            .catalog
            .resolve(key)
            .and_then(|info| registry.streams.get(&info.id))
            .cloned()
            .ok_or_else(|| {
                CatalogError::StreamNotFound {
                    selector: key.to_string(),
                }
                .into()
            })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Registry>> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        if registry.closed {
            return Err(StrataError::UseAfterClose { handle: "connection" });
        }
        Ok(registry)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Registry>> {
        let registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.closed {
            return Err(StrataError::UseAfterClose { handle: "connection" });
        }
        Ok(registry)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!("closing {} on drop: {e}", self.root.display());
        }
    }
}

fn stream_dir(root: &Path, id: StreamId) -> PathBuf {
    root.join(STREAMS_DIR).join(format!("stream_{id}"))
}

fn flush_streams<'a>(streams: impl Iterator<Item = &'a Arc<Stream>>) -> Result<()> {
    let mut result = Ok(());
    for stream in streams {
        if let Err(e) = stream.store.flush() {
            tracing::warn!("flushing {} failed: {e}", stream.info.canonical);
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::value::{Point, Value};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_connection_is_send_sync() {
        assert_send_sync::<Connection>();
        assert_send_sync::<Stream>();
    }

    #[test]
    fn test_open_creates_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("db");
        let connection = Connection::open(&root).unwrap();
        assert!(root.join("streams").is_dir());
        assert_eq!(connection.root(), root);
        assert!(connection.streams().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = Options {
            inserter_batch_size: 0,
            ..Options::default()
        };
        let err = Connection::open_with_options(temp_dir.path(), options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_create_and_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = Connection::open(temp_dir.path()).unwrap();

        assert!(!connection.stream_exists(r#"cpu{host="a"}"#).unwrap());
        let info = connection
            .create_stream(r#"cpu{host="a"}"#, ValueKind::Float)
            .unwrap();
        assert!(connection.stream_exists(r#"cpu{ host = "a" }"#).unwrap());
        assert!(temp_dir.path().join("streams").join(format!("stream_{}", info.id)).is_dir());

        let again = connection
            .create_stream(r#"cpu{host="a"}"#, ValueKind::Float)
            .unwrap();
        assert_eq!(again, info);

        let err = connection
            .create_stream(r#"cpu{host="a"}"#, ValueKind::UnsignedInteger)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let (_, created) = connection
            .get_or_create_stream("mem", ValueKind::UnsignedInteger)
            .unwrap();
        assert!(created);
        assert_eq!(connection.streams().unwrap().len(), 2);
    }

    #[test]
    fn test_inserter_requires_existing_stream() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = Connection::open(temp_dir.path()).unwrap();
        let err = connection.inserter("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamNotFound);

        let err = connection.inserter("sum(missing)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_matching_streams() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = Connection::open(temp_dir.path()).unwrap();
        connection.create_stream(r#"cpu{host="a",core="0"}"#, ValueKind::Float).unwrap();
        connection.create_stream(r#"cpu{host="a",core="1"}"#, ValueKind::Float).unwrap();

        assert_eq!(connection.matching_streams(r#"cpu{host="a"}"#).unwrap().len(), 2);
        let err = connection.prepare(r#"cpu{host="a"}"#, None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamNotFound);
    }

    #[test]
    fn test_reopen_preserves_flushed_data() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let connection = Connection::open(temp_dir.path()).unwrap();
            connection.create_stream("m", ValueKind::SignedInteger).unwrap();
            let mut inserter = connection.inserter("m").unwrap();
            inserter.insert_signed(1, -10).unwrap();
            inserter.insert_signed(2, 20).unwrap();
            inserter.close().unwrap();
        }

        let connection = Connection::open(temp_dir.path()).unwrap();
        let points: Vec<Point> = connection
            .prepare("m", None, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(points, vec![Point::new(1, -10i64), Point::new(2, 20i64)]);

        let stats = connection.stream_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].1.durable_points, 2);
    }

    #[test]
    fn test_drop_flushes_write_buffer() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let connection = Connection::open(temp_dir.path()).unwrap();
            connection.create_stream("m", ValueKind::UnsignedInteger).unwrap();
            let mut inserter = connection.inserter("m").unwrap();
            inserter.insert_unsigned(7, 70).unwrap();
            drop(inserter);
        }

        let connection = Connection::open(temp_dir.path()).unwrap();
        let mut statement = connection.prepare("sum(m)", None, None).unwrap();
        assert_eq!(statement.next_scalar().unwrap(), Some(Value::UnsignedInteger(70)));
    }

    #[test]
    fn test_use_after_close() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = Connection::open(temp_dir.path()).unwrap();
        connection.create_stream("m", ValueKind::Float).unwrap();
        connection.close().unwrap();
        assert!(connection.is_closed());

        let checks = [
            connection.close().unwrap_err(),
            connection.create_stream("n", ValueKind::Float).unwrap_err(),
            connection.stream_exists("m").unwrap_err(),
            connection.inserter("m").unwrap_err(),
            connection.prepare("m", None, None).unwrap_err(),
            connection.flush_all().unwrap_err(),
        ];
        for err in checks {
            assert_eq!(err.kind(), ErrorKind::UseAfterClose);
        }
    }

    #[test]
    fn test_close_keeps_points_of_open_inserters() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = Connection::open(temp_dir.path()).unwrap();
        connection.create_stream("m", ValueKind::UnsignedInteger).unwrap();

        let mut inserter = connection.inserter("m").unwrap();
        for i in 0..5 {
            inserter.insert_unsigned(i, i).unwrap();
        }
        connection.close().unwrap();
        assert_eq!(inserter.pending(), 0);
        drop(inserter);

        let connection = Connection::open(temp_dir.path()).unwrap();
        let mut statement = connection.prepare("count(m)", None, None).unwrap();
        assert_eq!(statement.next_scalar().unwrap(), Some(Value::UnsignedInteger(5)));
    }

    #[test]
    fn test_failed_store_open_leaves_no_stream() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = Connection::open(temp_dir.path()).unwrap();

        // a file where the stream directory should go
        let blocker = stream_dir(temp_dir.path(), StreamId(0));
        std::fs::write(&blocker, b"").unwrap();

        let err = connection.create_stream("m", ValueKind::Float).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!connection.stream_exists("m").unwrap());
        assert!(connection.streams().unwrap().is_empty());

        std::fs::remove_file(&blocker).unwrap();
        let info = connection.create_stream("m", ValueKind::Float).unwrap();
        assert_eq!(info.id, StreamId(0));
        assert!(connection.inserter("m").is_ok());
    }
}
