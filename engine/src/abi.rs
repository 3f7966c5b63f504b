//! C-shaped callback interface of the engine.
//!
//! The engine calls back into its embedder through plain function
//! pointers and an opaque hook pointer, exactly as it would across a
//! C library boundary.  Callbacks must never unwind: a Rust panic
//! escaping an `extern "C"` function aborts the process.

use libc::{c_char, c_int, c_void, off_t, size_t, ssize_t};

/// A packed engine error as passed over the ABI.
pub type RawError = libc::c_uint;

/// Requests a passphrase.
///
/// The callee writes the passphrase followed by a newline to `fd`.
/// Returning a non-zero error aborts the operation with that error.
pub type PassphraseCb = unsafe extern "C" fn(
    hook: *mut c_void,
    uid_hint: *const c_char,
    passphrase_info: *const c_char,
    prev_was_bad: c_int,
    fd: c_int,
) -> RawError;

/// Reports progress.  Cannot fail.
pub type ProgressCb = unsafe extern "C" fn(
    hook: *mut c_void,
    what: *const c_char,
    typ: c_int,
    current: c_int,
    total: c_int,
);

/// Reports a status line.
///
/// Returning a non-zero error aborts the operation with that error.
pub type StatusCb = unsafe extern "C" fn(
    hook: *mut c_void,
    keyword: *const c_char,
    args: *const c_char,
) -> RawError;

/// Drives an interactive edit session.
///
/// For prompts, the callee writes its answer followed by a newline
/// to `fd`.  For informational status codes, `fd` is `-1`.
pub type EditCb = unsafe extern "C" fn(
    hook: *mut c_void,
    status: c_int,
    args: *const c_char,
    fd: c_int,
) -> RawError;

/// Reads up to `size` bytes into `buffer`.
///
/// Returns the number of bytes read, `0` on EOF, or `-1` with
/// `errno` set.
pub type ReadCb = unsafe extern "C" fn(
    handle: *mut c_void,
    buffer: *mut c_void,
    size: size_t,
) -> ssize_t;

/// Writes `size` bytes from `buffer`.
///
/// Returns the number of bytes written, or `-1` with `errno` set.
pub type WriteCb = unsafe extern "C" fn(
    handle: *mut c_void,
    buffer: *const c_void,
    size: size_t,
) -> ssize_t;

/// Repositions the stream.
///
/// Returns the new offset, or `-1` with `errno` set.
pub type SeekCb = unsafe extern "C" fn(
    handle: *mut c_void,
    offset: off_t,
    whence: c_int,
) -> off_t;

/// Releases the handle.  Called exactly once.
pub type ReleaseCb = unsafe extern "C" fn(handle: *mut c_void);

/// The callback table of a data object.
#[repr(C)]
pub struct DataCbs {
    pub read: Option<ReadCb>,
    pub write: Option<WriteCb>,
    pub seek: Option<SeekCb>,
    pub release: Option<ReleaseCb>,
}

/// A callback together with its hook pointer.
///
/// The engine stores these for as long as they are installed.  The
/// embedder guarantees that `hook` stays valid for that time.
#[derive(Clone, Copy)]
pub struct Callback<F: Copy> {
    pub func: F,
    pub hook: *mut c_void,
}

// The hook is only ever dereferenced by `func`, on the thread
// driving the operation.
unsafe impl<F: Copy> Send for Callback<F> {}

impl<F: Copy> Callback<F> {
    pub fn new(func: F, hook: *mut c_void) -> Self {
        Callback { func, hook }
    }
}

/// Sets the calling thread's `errno`.
///
/// Data callbacks report failures this way.
pub fn set_errno(errno: c_int) {
    // SAFETY: the errno location is a valid thread-local pointer.
    unsafe {
        *errno_location() = errno;
    }
}

#[cfg(any(target_os = "linux", target_os = "android",
          target_os = "emscripten", target_os = "fuchsia"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios",
          target_os = "freebsd", target_os = "dragonfly"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__error()
}

#[cfg(any(target_os = "openbsd", target_os = "netbsd"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno()
}
