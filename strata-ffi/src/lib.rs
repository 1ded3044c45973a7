//! C-compatible boundary for strata.
//!
//! Handles are opaque boxed core objects. Every function returns a `u8`
//! status: [`STRATA_OK`] on success, an [`strata::ErrorKind`] discriminant on
//! failure, or [`STRATA_PANIC`] if a panic was caught. On failure the message
//! is available from [`strata_last_error_message`] until the next call on the
//! same thread.
//!
//! Inserters and statements stay valid memory after `strata_close`; using
//! them afterwards reports `UseAfterClose` instead of touching freed state.
//!
//! Range bounds passed to [`strata_query_prepare`] are nullable pointers: a
//! null start means 0 and a null end means unbounded.

mod error;

use std::ffi::{CStr, c_char};

use strata::{Connection, Inserter, Point, QueryOutput, Statement, Timestamp, Value, ValueKind};

use crate::error::{FfiError, guard, last_error_ptr};
pub use crate::error::{STRATA_OK, STRATA_PANIC};

/// Opaque connection handle.
pub struct StrataConnection {
    inner: Connection,
}

/// Opaque inserter handle.
pub struct StrataInserter {
    inner: Inserter,
}

/// Opaque statement handle.
pub struct StrataStatement {
    inner: Statement,
}

/// A value tagged with its kind; `bits` is the raw 64-bit pattern.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrataValue {
    /// `ValueKind` discriminant.
    pub kind: u8,
    /// Value bits, reinterpreted according to `kind`.
    pub bits: u64,
}

impl From<Value> for StrataValue {
    fn from(value: Value) -> Self {
        Self {
            kind: value.kind() as u8,
            bits: value.to_bits(),
        }
    }
}

/// A single point of a vector result.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrataPoint {
    /// Point timestamp.
    pub timestamp: Timestamp,
    /// Point value.
    pub value: StrataValue,
}

impl From<Point> for StrataPoint {
    fn from(point: Point) -> Self {
        Self {
            timestamp: point.timestamp,
            value: point.value.into(),
        }
    }
}

/// `StrataResult::tag` when the statement is exhausted.
pub const STRATA_RESULT_DONE: u8 = 0;
/// `StrataResult::tag` for an aggregate value.
pub const STRATA_RESULT_SCALAR: u8 = 1;
/// `StrataResult::tag` for a point.
pub const STRATA_RESULT_VECTOR: u8 = 2;

/// One pull from a statement.
///
/// `timestamp` is only meaningful for vector results. For `Done`, every
/// field other than `tag` is zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrataResult {
    /// One of the `STRATA_RESULT_*` constants.
    pub tag: u8,
    /// `ValueKind` discriminant of `value`.
    pub value_kind: u8,
    /// Timestamp of a vector point.
    pub timestamp: Timestamp,
    /// Value bits, reinterpreted according to `value_kind`.
    pub value: u64,
}

impl From<QueryOutput> for StrataResult {
    fn from(output: QueryOutput) -> Self {
        match output {
            QueryOutput::Done => Self::default(),
            QueryOutput::Scalar(value) => Self {
                tag: STRATA_RESULT_SCALAR,
                value_kind: value.kind() as u8,
                timestamp: 0,
                value: value.to_bits(),
            },
            QueryOutput::Vector(point) => Self {
                tag: STRATA_RESULT_VECTOR,
                value_kind: point.value.kind() as u8,
                timestamp: point.timestamp,
                value: point.value.to_bits(),
            },
        }
    }
}

/// Borrows a NUL-terminated UTF-8 argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, name: &'static str) -> Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::NullPointer(name));
    }
    // SAFETY: non-null, and the caller guarantees NUL termination and lifetime.
    let cstr = unsafe { CStr::from_ptr(ptr) };
    cstr.to_str().map_err(|_| FfiError::InvalidUtf8(name))
}

/// # Safety
///
/// `ptr` must be null or a live handle produced by this library.
unsafe fn handle_ref<'a, T>(ptr: *const T, name: &'static str) -> Result<&'a T, FfiError> {
    // SAFETY: the caller guarantees a non-null `ptr` is a live, aligned handle.
    unsafe { ptr.as_ref() }.ok_or(FfiError::NullPointer(name))
}

/// # Safety
///
/// `ptr` must be null or a live handle not aliased for the duration of `'a`.
unsafe fn handle_mut<'a, T>(ptr: *mut T, name: &'static str) -> Result<&'a mut T, FfiError> {
    // SAFETY: the caller guarantees a non-null `ptr` is a live, unaliased handle.
    unsafe { ptr.as_mut() }.ok_or(FfiError::NullPointer(name))
}

/// # Safety
///
/// `out` must be null or valid for a write of `T`.
unsafe fn write_out<T>(out: *mut T, value: T, name: &'static str) -> Result<(), FfiError> {
    if out.is_null() {
        return Err(FfiError::NullPointer(name));
    }
    // SAFETY: non-null, and the caller guarantees it is valid for writes.
    unsafe { out.write(value) };
    Ok(())
}

/// # Safety
///
/// `ptr` must be null or point to a readable `u64`.
unsafe fn optional_bound(ptr: *const Timestamp) -> Option<Timestamp> {
    // SAFETY: the caller guarantees a non-null `ptr` is readable.
    unsafe { ptr.as_ref() }.copied()
}

/// Opens or creates a database rooted at `root`.
///
/// # Safety
///
/// `root` must be a NUL-terminated string and `out` valid for writes. On
/// success `*out` owns a connection that must be released with
/// [`strata_close`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_open(root: *const c_char, out: *mut *mut StrataConnection) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let root = unsafe { str_arg(root, "root") }?;
        if out.is_null() {
            return Err(FfiError::NullPointer("out"));
        }
        let connection = Connection::open(root)?;
        let handle = Box::into_raw(Box::new(StrataConnection { inner: connection }));
        // SAFETY: checked non-null above; the caller guarantees it is writable.
        unsafe { write_out(out, handle, "out") }
    })
}

/// Flushes every stream, closes the connection and frees the handle.
///
/// A null handle is a no-op. The handle is freed even when the final flush
/// fails; the returned status reports that failure.
///
/// # Safety
///
/// `connection` must be null or a handle from [`strata_open`] that has not
/// already been closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_close(connection: *mut StrataConnection) -> u8 {
    guard(|| {
        if connection.is_null() {
            return Ok(());
        }
        // SAFETY: the caller transfers ownership of a handle from strata_open.
        let connection = unsafe { Box::from_raw(connection) };
        connection.inner.close()?;
        Ok(())
    })
}

/// Creates a stream, or succeeds if it already exists with the same kind.
///
/// # Safety
///
/// `connection` must be a live handle and `selector` a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_stream_create(
    connection: *const StrataConnection,
    selector: *const c_char,
    kind: u8,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let connection = unsafe { handle_ref(connection, "connection") }?;
        // SAFETY: forwarded caller guarantees.
        let selector = unsafe { str_arg(selector, "selector") }?;
        let kind = ValueKind::try_from(kind).map_err(FfiError::UnknownValueKind)?;
        connection.inner.create_stream(selector, kind)?;
        Ok(())
    })
}

/// Writes whether a stream with exactly this identity exists.
///
/// # Safety
///
/// `connection` must be a live handle, `selector` a NUL-terminated string
/// and `out` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_stream_check_exists(
    connection: *const StrataConnection,
    selector: *const c_char,
    out: *mut bool,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let connection = unsafe { handle_ref(connection, "connection") }?;
        // SAFETY: forwarded caller guarantees.
        let selector = unsafe { str_arg(selector, "selector") }?;
        let exists = connection.inner.stream_exists(selector)?;
        // SAFETY: forwarded caller guarantees.
        unsafe { write_out(out, exists, "out") }
    })
}

/// Opens an inserter on an existing stream.
///
/// # Safety
///
/// `connection` must be a live handle, `selector` a NUL-terminated string
/// and `out` valid for writes. On success `*out` must be released with
/// [`strata_inserter_close`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_inserter_create(
    connection: *const StrataConnection,
    selector: *const c_char,
    out: *mut *mut StrataInserter,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let connection = unsafe { handle_ref(connection, "connection") }?;
        // SAFETY: forwarded caller guarantees.
        let selector = unsafe { str_arg(selector, "selector") }?;
        if out.is_null() {
            return Err(FfiError::NullPointer("out"));
        }
        let inserter = connection.inner.inserter(selector)?;
        let handle = Box::into_raw(Box::new(StrataInserter { inner: inserter }));
        // SAFETY: checked non-null above; the caller guarantees it is writable.
        unsafe { write_out(out, handle, "out") }
    })
}

/// # Safety
///
/// `inserter` must be null or a live, unaliased handle.
unsafe fn insert_with<F>(inserter: *mut StrataInserter, f: F) -> u8
where
    F: FnOnce(&mut Inserter) -> strata::Result<()>,
{
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let inserter = unsafe { handle_mut(inserter, "inserter") }?;
        f(&mut inserter.inner)?;
        Ok(())
    })
}

/// Inserts an unsigned point.
///
/// # Safety
///
/// `inserter` must be a live handle not used concurrently from another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_inserter_insert_unsigned(
    inserter: *mut StrataInserter,
    timestamp: Timestamp,
    value: u64,
) -> u8 {
    // SAFETY: forwarded caller guarantees.
    unsafe { insert_with(inserter, |i| i.insert_unsigned(timestamp, value)) }
}

/// Inserts a signed point.
///
/// # Safety
///
/// `inserter` must be a live handle not used concurrently from another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_inserter_insert_signed(
    inserter: *mut StrataInserter,
    timestamp: Timestamp,
    value: i64,
) -> u8 {
    // SAFETY: forwarded caller guarantees.
    unsafe { insert_with(inserter, |i| i.insert_signed(timestamp, value)) }
}

/// Inserts a float point.
///
/// # Safety
///
/// `inserter` must be a live handle not used concurrently from another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_inserter_insert_float(
    inserter: *mut StrataInserter,
    timestamp: Timestamp,
    value: f64,
) -> u8 {
    // SAFETY: forwarded caller guarantees.
    unsafe { insert_with(inserter, |i| i.insert_float(timestamp, value)) }
}

/// Makes every point inserted so far durable.
///
/// # Safety
///
/// `inserter` must be a live handle not used concurrently from another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_inserter_flush(inserter: *mut StrataInserter) -> u8 {
    // SAFETY: forwarded caller guarantees.
    unsafe { insert_with(inserter, Inserter::flush) }
}

/// Flushes pending points and frees the inserter. A null handle is a no-op.
///
/// The handle is freed even when the flush fails, for example with
/// `UseAfterClose` once the connection is gone.
///
/// # Safety
///
/// `inserter` must be null or a handle from [`strata_inserter_create`] that
/// has not already been closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_inserter_close(inserter: *mut StrataInserter) -> u8 {
    guard(|| {
        if inserter.is_null() {
            return Ok(());
        }
        // SAFETY: the caller transfers ownership of a handle from strata_inserter_create.
        let inserter = unsafe { Box::from_raw(inserter) };
        inserter.inner.close()?;
        Ok(())
    })
}

/// Parses, plans and opens a query over `[*start, *end)`.
///
/// # Safety
///
/// `connection` must be a live handle, `query` a NUL-terminated string,
/// `start` and `end` null or readable, and `out` valid for writes. On
/// success `*out` must be released with [`strata_query_close`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_query_prepare(
    connection: *const StrataConnection,
    query: *const c_char,
    start: *const Timestamp,
    end: *const Timestamp,
    out: *mut *mut StrataStatement,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let connection = unsafe { handle_ref(connection, "connection") }?;
        // SAFETY: forwarded caller guarantees.
        let query = unsafe { str_arg(query, "query") }?;
        if out.is_null() {
            return Err(FfiError::NullPointer("out"));
        }
        // SAFETY: forwarded caller guarantees.
        let (start, end) = unsafe { (optional_bound(start), optional_bound(end)) };
        let statement = connection.inner.prepare(query, start, end)?;
        let handle = Box::into_raw(Box::new(StrataStatement { inner: statement }));
        // SAFETY: checked non-null above; the caller guarantees it is writable.
        unsafe { write_out(out, handle, "out") }
    })
}

/// Writes the `ValueKind` discriminant of the statement's values.
///
/// # Safety
///
/// `statement` must be a live handle and `out` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_query_value_type(
    statement: *const StrataStatement,
    out: *mut u8,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let statement = unsafe { handle_ref(statement, "statement") }?;
        // SAFETY: forwarded caller guarantees.
        unsafe { write_out(out, statement.inner.value_kind() as u8, "out") }
    })
}

/// Writes the `ReturnType` discriminant (0 scalar, 1 vector).
///
/// # Safety
///
/// `statement` must be a live handle and `out` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_query_return_type(
    statement: *const StrataStatement,
    out: *mut u8,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let statement = unsafe { handle_ref(statement, "statement") }?;
        // SAFETY: forwarded caller guarantees.
        unsafe { write_out(out, statement.inner.return_type() as u8, "out") }
    })
}

/// Pulls the next result of either shape.
///
/// # Safety
///
/// `statement` must be a live handle not used concurrently from another
/// thread, and `out` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_query_next(
    statement: *mut StrataStatement,
    out: *mut StrataResult,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let statement = unsafe { handle_mut(statement, "statement") }?;
        let output = statement.inner.next_output()?;
        // SAFETY: forwarded caller guarantees.
        unsafe { write_out(out, output.into(), "out") }
    })
}

/// Pulls the next point of a vector statement.
///
/// `*found` is false once the statement is exhausted, in which case `*out`
/// is left untouched.
///
/// # Safety
///
/// `statement` must be a live handle not used concurrently from another
/// thread; `out` and `found` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_query_next_vector(
    statement: *mut StrataStatement,
    out: *mut StrataPoint,
    found: *mut bool,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let statement = unsafe { handle_mut(statement, "statement") }?;
        if out.is_null() {
            return Err(FfiError::NullPointer("out"));
        }
        let point = statement.inner.next_vector()?;
        // SAFETY: forwarded caller guarantees.
        unsafe { write_out(found, point.is_some(), "found") }?;
        match point {
            // SAFETY: checked non-null above; the caller guarantees it is writable.
            Some(point) => unsafe { write_out(out, point.into(), "out") },
            None => Ok(()),
        }
    })
}

/// Pulls the value of a scalar statement.
///
/// `*found` is true exactly once; later calls report false and leave `*out`
/// untouched.
///
/// # Safety
///
/// `statement` must be a live handle not used concurrently from another
/// thread; `out` and `found` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_query_next_scalar(
    statement: *mut StrataStatement,
    out: *mut StrataValue,
    found: *mut bool,
) -> u8 {
    guard(|| {
        // SAFETY: forwarded caller guarantees.
        let statement = unsafe { handle_mut(statement, "statement") }?;
        if out.is_null() {
            return Err(FfiError::NullPointer("out"));
        }
        let value = statement.inner.next_scalar()?;
        // SAFETY: forwarded caller guarantees.
        unsafe { write_out(found, value.is_some(), "found") }?;
        match value {
            // SAFETY: checked non-null above; the caller guarantees it is writable.
            Some(value) => unsafe { write_out(out, value.into(), "out") },
            None => Ok(()),
        }
    })
}

/// Frees a statement. A null handle is a no-op.
///
/// # Safety
///
/// `statement` must be null or a handle from [`strata_query_prepare`] that
/// has not already been closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strata_query_close(statement: *mut StrataStatement) -> u8 {
    guard(|| {
        if statement.is_null() {
            return Ok(());
        }
        // SAFETY: the caller transfers ownership of a handle from strata_query_prepare.
        let mut statement = unsafe { Box::from_raw(statement) };
        statement.inner.close();
        Ok(())
    })
}

/// Message of the last failed call on this thread, or null.
///
/// The string is owned by the library and stays valid until the next call
/// into the library on the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn strata_last_error_message() -> *const c_char {
    last_error_ptr()
}
