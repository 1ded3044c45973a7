//! Status codes and the per-thread last error.

use std::cell::RefCell;
use std::ffi::{CString, c_char};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use strata::{ErrorKind, StrataError};
use thiserror::Error;

/// Returned by every function on success.
pub const STRATA_OK: u8 = 0;

/// Returned when a panic was caught at the boundary.
pub const STRATA_PANIC: u8 = 255;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Failures raised at the boundary itself or passed through from the core.
#[derive(Error, Debug)]
pub(crate) enum FfiError {
    /// Error returned by the database.
    #[error(transparent)]
    Strata(#[from] StrataError),

    /// A required pointer argument was null.
    #[error("argument '{0}' must not be null")]
    NullPointer(&'static str),

    /// A string argument was not valid UTF-8.
    #[error("argument '{0}' is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// A value kind discriminant outside the known range.
    #[error("unknown value kind {0}")]
    UnknownValueKind(u8),
}

impl FfiError {
    fn code(&self) -> u8 {
        match self {
            Self::Strata(err) => err.kind().code(),
            Self::NullPointer(_) | Self::InvalidUtf8(_) | Self::UnknownValueKind(_) => {
                ErrorKind::InvalidArgument.code()
            }
        }
    }
}

fn set_last_error(message: String) {
    // interior NULs would truncate the message on the C side
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Pointer to the last error message on this thread, or null.
pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

/// Runs `f`, converting its outcome into a status code.
///
/// Errors are recorded as this thread's last error. A panic never crosses
/// the boundary: it is caught and reported as [`STRATA_PANIC`].
pub(crate) fn guard<F>(f: F) -> u8
where
    F: FnOnce() -> Result<(), FfiError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            clear_last_error();
            STRATA_OK
        }
        Ok(Err(err)) => {
            tracing::debug!("strata call failed: {err}");
            let code = err.code();
            set_last_error(err.to_string());
            code
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("panic caught at the C boundary: {reason}");
            set_last_error(format!("panic: {reason}"));
            STRATA_PANIC
        }
    }
}
