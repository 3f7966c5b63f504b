//! Data stream adapter.
//!
//! Binds a host [`Stream`] to an engine data object for the duration
//! of one operation.  The engine reads, writes and seeks through the
//! callbacks below while the operation runs; each call resumes the
//! runtime just long enough to call into the stream.
//!
//! The adapter holds a reference to the stream and to the context.
//! Both are released when the engine releases the data object,
//! exactly once.
//!
//!   [`Stream`]: ../host/trait.Stream.html

use std::sync::Arc;

use libc::{c_int, c_void, off_t, size_t, ssize_t};

use crate::context::Inner;
use crate::engine::abi::{set_errno, DataCbs};
use crate::engine::Data;
use crate::host::{HostError, Stream, Value};
use crate::{Error, Result};

struct StreamHandle {
    stream: Arc<dyn Stream>,
    inner: Arc<Inner>,
}

static STREAM_CBS: DataCbs = DataCbs {
    read: Some(read),
    write: Some(write),
    seek: Some(seek),
    release: Some(release),
};

/// Reports a failed host call to the engine.
fn fail(inner: &Inner, r: std::thread::Result<std::result::Result<(), HostError>>)
        -> c_int {
    let e = match r {
        Ok(Ok(())) => return 0,
        Ok(Err(e)) => e,
        Err(p) => HostError::from_panic(p),
    };
    let errno = e.to_errno();
    log::debug!("Stream failed: {}", e);
    inner.stash(e);
    errno
}

unsafe extern "C" fn read(handle: *mut c_void, buffer: *mut c_void,
                          size: size_t) -> ssize_t {
    let h = &*(handle as *const StreamHandle);
    let mut n = 0;
    let r = h.inner.reenter(|| {
        match h.stream.read(size)? {
            Value::Bytes(b) => {
                n = b.len().min(size);
                std::ptr::copy_nonoverlapping(b.as_ptr(), buffer as *mut u8, n);
                Ok(())
            },
            v => Err(HostError {
                errno: Some(libc::EINVAL),
                ..HostError::new(format!("read() returned {:?}, not bytes", v))
            }),
        }
    });

    match fail(&h.inner, r) {
        0 => n as ssize_t,
        errno => {
            set_errno(errno);
            -1
        },
    }
}

unsafe extern "C" fn write(handle: *mut c_void, buffer: *const c_void,
                           size: size_t) -> ssize_t {
    let h = &*(handle as *const StreamHandle);
    let buf = std::slice::from_raw_parts(buffer as *const u8, size);
    let r = h.inner.reenter(|| h.stream.write(buf));

    match fail(&h.inner, r) {
        0 => size as ssize_t,
        errno => {
            set_errno(errno);
            -1
        },
    }
}

unsafe extern "C" fn seek(handle: *mut c_void, offset: off_t, whence: c_int)
                          -> off_t {
    let h = &*(handle as *const StreamHandle);
    let mut pos = 0;
    let r = h.inner.reenter(|| {
        h.stream.seek(offset as i64, whence)?;
        match h.stream.tell()? {
            Value::Int(p) => {
                pos = p;
                Ok(())
            },
            v => Err(HostError {
                errno: Some(libc::EINVAL),
                ..HostError::new(format!("tell() returned {:?}, not an int", v))
            }),
        }
    });

    match fail(&h.inner, r) {
        0 => pos as off_t,
        errno => {
            set_errno(errno);
            -1
        },
    }
}

unsafe extern "C" fn release(handle: *mut c_void) {
    drop(Box::from_raw(handle as *mut StreamHandle));
}

/// Creates a data object reading from and writing to `stream`.
///
/// The returned object must be dropped while the runtime is not
/// suspended, as dropping it releases the stream.
pub(crate) fn adapt(inner: &Arc<Inner>, stream: Arc<dyn Stream>)
                    -> Result<Data> {
    let handle = Box::into_raw(Box::new(StreamHandle {
        stream,
        inner: inner.clone(),
    }));

    // SAFETY: the handle is valid until `release` frees it.
    match unsafe { Data::from_cbs(&STREAM_CBS, handle as *mut c_void) } {
        Ok(data) => Ok(data),
        Err(e) => {
            // Still ours.
            drop(unsafe { Box::from_raw(handle) });
            Err(Error::from(e).into())
        },
    }
}

/// Like `adapt`, passing `None` through.
pub(crate) fn adapt_opt(inner: &Arc<Inner>, stream: Option<Arc<dyn Stream>>)
                        -> Result<Option<Data>> {
    stream.map(|s| adapt(inner, s)).transpose()
}
