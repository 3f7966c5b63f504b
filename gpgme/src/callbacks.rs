//! Callback relay.
//!
//! These are the functions installed on the engine session.  Each one
//! resumes the runtime from the state saved in the context, invokes
//! the host callable with the arguments converted to host values,
//! suspends the runtime again, and reports a host error back to the
//! engine as an error code.

use std::ffi::CStr;
use std::sync::Arc;

use libc::{c_char, c_int, c_void};

use crate::context::{lock, Inner};
use crate::engine::abi::RawError;
use crate::host::{Callable, HostError, Value};

/// Converts a string from the engine.
///
/// # Safety
///
/// `s` must be null or point to a NUL terminated string.
unsafe fn text(s: *const c_char) -> Value {
    if s.is_null() {
        Value::None
    } else {
        Value::Str(CStr::from_ptr(s).to_string_lossy().into_owned())
    }
}

fn not_installed(what: &str) -> HostError {
    HostError::new(format!("No {} callback installed", what))
}

pub(crate) unsafe extern "C" fn passphrase(hook: *mut c_void,
                                           uid_hint: *const c_char,
                                           passphrase_info: *const c_char,
                                           prev_was_bad: c_int,
                                           fd: c_int) -> RawError {
    log::trace!("passphrase: prev_was_bad: {}, fd: {}", prev_was_bad, fd);
    let inner = &*(hook as *const Inner);
    let r = inner.reenter(|| {
        let cb = lock(&inner.callbacks).passphrase.clone()
            .ok_or_else(|| not_installed("passphrase"))?;
        cb.call(&[
            text(uid_hint),
            text(passphrase_info),
            Value::Int(prev_was_bad as i64),
            Value::Int(fd as i64),
        ])
    });
    inner.relay(r)
}

pub(crate) unsafe extern "C" fn progress(hook: *mut c_void,
                                         what: *const c_char,
                                         typ: c_int,
                                         current: c_int,
                                         total: c_int) {
    log::trace!("progress: {}/{}", current, total);
    let inner = &*(hook as *const Inner);
    let r = inner.reenter(|| {
        let cb = match lock(&inner.callbacks).progress.clone() {
            Some(cb) => cb,
            None => return Ok(Value::None),
        };
        cb.call(&[
            text(what),
            Value::Int(typ as i64),
            Value::Int(current as i64),
            Value::Int(total as i64),
        ])
    });

    // Progress reports must never abort the operation.
    match r {
        Ok(Ok(_)) => (),
        Ok(Err(e)) => log::warn!("Ignoring error from progress callback: {}", e),
        Err(p) => log::warn!("Ignoring panic in progress callback: {}",
                             HostError::from_panic(p)),
    }
}

pub(crate) unsafe extern "C" fn status(hook: *mut c_void,
                                       keyword: *const c_char,
                                       args: *const c_char) -> RawError {
    let inner = &*(hook as *const Inner);
    let r = inner.reenter(|| {
        let cb = lock(&inner.callbacks).status.clone()
            .ok_or_else(|| not_installed("status"))?;
        let keyword = text(keyword);
        log::trace!("status: {:?}", keyword);
        cb.call(&[keyword, text(args)])
    });
    inner.relay(r)
}

/// The hook of an edit session.
///
/// Lives on the stack of the edit driver for the duration of the
/// operation.
pub(crate) struct EditHook<'a> {
    pub inner: &'a Inner,
    pub callback: Arc<dyn Callable>,
}

pub(crate) unsafe extern "C" fn edit(hook: *mut c_void, status: c_int,
                                     args: *const c_char, fd: c_int)
                                     -> RawError {
    log::trace!("edit: status {}, fd {}", status, fd);
    let hook = &*(hook as *const EditHook);
    let r = hook.inner.reenter(|| {
        hook.callback.call(&[
            Value::Int(status as i64),
            text(args),
            Value::Int(fd as i64),
        ])
    });
    hook.inner.relay(r)
}
