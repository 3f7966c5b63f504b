//! Engine handles.
//!
//! A [`Context`] owns one engine session.  The session is not thread
//! safe, so every access goes through a mutex, and every access
//! releases the runtime's global execution lock first so that other
//! host threads keep running while this one waits for, or blocks in,
//! the engine.
//!
//! There are two ways in:
//!
//!   - Property accessors take the light path: release the execution
//!     lock, lock the session, do a short call that never invokes a
//!     callback, unlock, reacquire.
//!
//!   - Operations take the full path: the saved execution state is
//!     stored in the context while the engine runs, so that callbacks
//!     invoked by the engine can resume the runtime, call host code,
//!     and suspend it again before returning to the engine.
//!
//!   [`Context`]: struct.Context.html

use std::ffi::CString;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::callbacks;
use crate::engine::abi::{Callback, PassphraseCb, ProgressCb, RawError,
                         StatusCb};
use crate::engine::{self, EngineInfo, Key, KeylistMode, PinentryMode,
                    Protocol, Session, SigNotation};
use crate::host::{Callable, HostError, Value};
use crate::runtime::{Runtime, ThreadState};
use crate::{Config, Error, GpgmeError, Module, Result};

/// Locks a mutex, ignoring poisoning.
///
/// Panics in host code are caught before they can unwind through a
/// held lock, so a poisoned mutex still guards consistent data.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Aborts on a violated locking invariant.
///
/// This may run below an `extern "C"` frame, where unwinding is not
/// an option.
fn fatal(msg: &str) -> ! {
    log::error!("{}", msg);
    std::process::abort()
}

/// Host callables installed on a session.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub passphrase: Option<Arc<dyn Callable>>,
    pub progress: Option<Arc<dyn Callable>>,
    pub status: Option<Arc<dyn Callable>>,
}

/// The shared part of a context.
///
/// Lock order: `session` before any of the other mutexes, which are
/// leaves.
pub(crate) struct Inner {
    runtime: Arc<dyn Runtime>,
    session: Mutex<Box<dyn Session>>,
    /// Present iff an operation is running on some thread.
    thread_state: Mutex<Option<ThreadState>>,
    /// The thread running an operation.
    owner: Mutex<Option<ThreadId>>,
    pub(crate) callbacks: Mutex<Callbacks>,
    /// The first error raised by host code during an operation.
    callback_error: Mutex<Option<HostError>>,
    /// A key listing to end once the running operation returns.
    keylist_end_pending: AtomicBool,
    ephemeral: Option<tempfile::TempDir>,
}

/// An operation in progress.
///
/// Holds the session lock; the runtime is suspended.  Dropping it
/// clears the saved state, resumes the runtime, and only then
/// releases the session.
pub(crate) struct Running<'a> {
    inner: &'a Inner,
    session: MutexGuard<'a, Box<dyn Session>>,
}

impl Deref for Running<'_> {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        &**self.session
    }
}

impl DerefMut for Running<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.session
    }
}

impl Running<'_> {
    /// Converts the outcome of an engine call.
    ///
    /// An error raised by host code during the call is attached to
    /// the engine error.
    pub fn conclude<T>(&mut self, r: engine::Result<T>)
                       -> std::result::Result<T, GpgmeError> {
        let callback_error = lock(&self.inner.callback_error).take();
        match r {
            Ok(v) => {
                if let Some(e) = callback_error {
                    log::debug!("Operation succeeded despite callback \
                                 error: {}", e);
                }
                Ok(v)
            },
            Err(e) => Err(GpgmeError {
                callback_error,
                ..GpgmeError::new(e)
            }),
        }
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if self.inner.keylist_end_pending.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.session.op_keylist_end() {
                log::warn!("Ending key listing failed: {}", e);
            }
        }

        let state = match lock(&self.inner.thread_state).take() {
            Some(s) => s,
            None => fatal("Engine handle lost its saved thread state"),
        };
        *lock(&self.inner.owner) = None;
        self.inner.runtime.restore_thread(state);
        // The session guard is released after this.
    }
}

impl Inner {
    fn check_reentrancy(&self) {
        if self.in_callback() {
            panic!("Engine handle used from within one of its own callbacks");
        }
    }

    /// Returns whether this thread is inside one of our callbacks.
    pub fn in_callback(&self) -> bool {
        *lock(&self.owner) == Some(thread::current().id())
    }

    /// Ends the key listing when the running operation returns.
    pub fn defer_keylist_end(&self) {
        self.keylist_end_pending.store(true, Ordering::SeqCst);
    }

    /// Starts an operation.
    ///
    /// Releases the execution lock, locks the session and records
    /// the saved state, in that order.
    pub fn begin(&self) -> Running {
        self.check_reentrancy();
        let state = self.runtime.save_thread();
        let session = lock(&self.session);
        *lock(&self.owner) = Some(thread::current().id());
        *lock(&self.callback_error) = None;

        let mut slot = lock(&self.thread_state);
        if slot.is_some() {
            fatal("Engine handle is already running");
        }
        *slot = Some(state);
        drop(slot);

        Running { inner: self, session }
    }

    /// Runs a short call that does not invoke callbacks.
    pub fn with_session<F, R>(&self, f: F) -> R
        where F: FnOnce(&mut dyn Session) -> R
    {
        self.check_reentrancy();
        let state = self.runtime.save_thread();
        let r = {
            let mut session = lock(&self.session);
            panic::catch_unwind(AssertUnwindSafe(|| f(&mut **session)))
        };
        self.runtime.restore_thread(state);
        match r {
            Ok(r) => r,
            Err(p) => panic::resume_unwind(p),
        }
    }

    /// Resumes the runtime from within a running operation.
    ///
    /// Panics in `f` are caught and returned.
    pub fn reenter<F, R>(&self, f: F) -> thread::Result<R>
        where F: FnOnce() -> R
    {
        let state = match lock(&self.thread_state).take() {
            Some(s) => s,
            None => fatal("Callback invoked outside of a running operation"),
        };
        self.runtime.restore_thread(state);
        let r = panic::catch_unwind(AssertUnwindSafe(f));
        let state = self.runtime.save_thread();
        *lock(&self.thread_state) = Some(state);
        r
    }

    /// Remembers the first error raised by host code.
    pub fn stash(&self, e: HostError) {
        let mut slot = lock(&self.callback_error);
        if slot.is_none() {
            *slot = Some(e);
        } else {
            log::debug!("Dropping subsequent callback error: {}", e);
        }
    }

    /// Turns the outcome of a host call into an engine error code.
    pub fn relay(&self, r: thread::Result<std::result::Result<Value, HostError>>)
                 -> RawError {
        let e = match r {
            Ok(Ok(_)) => return 0,
            Ok(Err(e)) => e,
            Err(p) => HostError::from_panic(p),
        };
        let raw = e.to_engine_error().raw();
        self.stash(e);
        raw
    }
}

/// An engine handle.
///
/// Contexts are cheap to clone; clones share the session.  Operations
/// on one session are serialized, operations on different contexts
/// run concurrently.
///
/// # Examples
///
/// ```
/// use sequoia_gpgme::{Context, Module};
///
/// # fn main() -> sequoia_gpgme::Result<()> {
/// let module = Module::in_process()?;
/// let ctx = Context::configure(&module).ephemeral().armor(true).build()?;
/// assert!(ctx.armor());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("inner", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

impl Context {
    /// Creates a context using the default configuration.
    pub fn new(module: &Module) -> Result<Self> {
        Self::configure(module).build()
    }

    /// Returns a builder for a context.
    pub fn configure(module: &Module) -> Config {
        Config::new(module)
    }

    pub(crate) fn from_session(runtime: Arc<dyn Runtime>,
                               session: Box<dyn Session>,
                               ephemeral: Option<tempfile::TempDir>) -> Self {
        Context {
            inner: Arc::new(Inner {
                runtime,
                session: Mutex::new(session),
                thread_state: Mutex::new(None),
                owner: Mutex::new(None),
                callbacks: Mutex::new(Callbacks::default()),
                callback_error: Mutex::new(None),
                keylist_end_pending: AtomicBool::new(false),
                ephemeral,
            }),
        }
    }

    /// The hook handed to the engine with our callbacks.
    fn hook(&self) -> *mut libc::c_void {
        Arc::as_ptr(&self.inner) as *mut libc::c_void
    }

    /// Returns the home directory, if the context is ephemeral.
    pub fn ephemeral_home(&self) -> Option<&std::path::Path> {
        self.inner.ephemeral.as_ref().map(|d| d.path())
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.with_session(|s| s.protocol())
    }

    pub fn set_protocol(&self, protocol: Protocol) -> Result<()> {
        self.inner.with_session(|s| s.set_protocol(protocol))
            .map_err(Error::from)?;
        Ok(())
    }

    /// Returns whether output is ASCII armored.
    pub fn armor(&self) -> bool {
        self.inner.with_session(|s| s.armor())
    }

    pub fn set_armor(&self, yes: bool) {
        self.inner.with_session(|s| s.set_armor(yes))
    }

    /// Returns whether signatures are made in text mode.
    pub fn textmode(&self) -> bool {
        self.inner.with_session(|s| s.textmode())
    }

    pub fn set_textmode(&self, yes: bool) {
        self.inner.with_session(|s| s.set_textmode(yes))
    }

    /// Returns whether the engine avoids network access.
    pub fn offline(&self) -> bool {
        self.inner.with_session(|s| s.offline())
    }

    pub fn set_offline(&self, yes: bool) {
        self.inner.with_session(|s| s.set_offline(yes))
    }

    /// Returns how many certificates are included in S/MIME
    /// signatures.
    pub fn include_certs(&self) -> i32 {
        self.inner.with_session(|s| s.include_certs())
    }

    pub fn set_include_certs(&self, nr_of_certs: i32) {
        self.inner.with_session(|s| s.set_include_certs(nr_of_certs))
    }

    pub fn keylist_mode(&self) -> KeylistMode {
        self.inner.with_session(|s| s.keylist_mode())
    }

    pub fn set_keylist_mode(&self, mode: KeylistMode) -> Result<()> {
        self.inner.with_session(|s| s.set_keylist_mode(mode))
            .map_err(Error::from)?;
        Ok(())
    }

    pub fn pinentry_mode(&self) -> PinentryMode {
        self.inner.with_session(|s| s.pinentry_mode())
    }

    pub fn set_pinentry_mode(&self, mode: PinentryMode) -> Result<()> {
        self.inner.with_session(|s| s.set_pinentry_mode(mode))
            .map_err(Error::from)?;
        Ok(())
    }

    /// Returns the sender address used for signing.
    pub fn sender(&self) -> Option<String> {
        self.inner.with_session(|s| s.sender().map(Into::into))
    }

    pub fn set_sender(&self, sender: Option<&str>) -> Result<()> {
        self.inner.with_session(|s| s.set_sender(sender))
            .map_err(Error::from)?;
        Ok(())
    }

    /// Returns the keys used for signing.
    pub fn signers(&self) -> Vec<Key> {
        self.inner.with_session(|s| s.signers())
    }

    /// Replaces the keys used for signing.
    pub fn set_signers(&self, keys: &[&Key]) -> Result<()> {
        self.inner.with_session(|s| {
            s.signers_clear();
            keys.iter().try_for_each(|k| s.signers_add(k))
        }).map_err(Error::from)?;
        Ok(())
    }

    /// Returns the notations added to new signatures.
    pub fn sig_notations(&self) -> Vec<SigNotation> {
        self.inner.with_session(|s| s.sig_notations())
    }

    /// Replaces the notations added to new signatures.
    ///
    /// The values of human readable notations must be UTF-8.
    pub fn set_sig_notations(&self, notations: &[SigNotation]) -> Result<()> {
        for n in notations {
            if n.human_readable() && std::str::from_utf8(&n.value).is_err() {
                return Err(Error::InvalidArgument(format!(
                    "Value of human readable notation {:?} is not UTF-8",
                    n.name)).into());
            }
        }

        self.inner.with_session(|s| {
            s.sig_notation_clear();
            notations.iter().try_for_each(|n| {
                s.sig_notation_add(n.name.as_deref(), &n.value, n.flags)
            })
        }).map_err(Error::from)?;
        Ok(())
    }

    /// Returns the passphrase callback.
    ///
    /// The callback is invoked with `(uid_hint, passphrase_info,
    /// prev_was_bad, fd)` and answers by writing the passphrase and a
    /// newline to `fd`, see [`write_fd`].  Raising an error cancels
    /// the operation.
    ///
    ///   [`write_fd`]: host/fn.write_fd.html
    pub fn passphrase_cb(&self) -> Option<Arc<dyn Callable>> {
        let trampoline = callbacks::passphrase as PassphraseCb as usize;
        self.inner.with_session(|s| match s.passphrase_cb() {
            Some(cb) if cb.func as usize == trampoline =>
                lock(&self.inner.callbacks).passphrase.clone(),
            _ => None,
        })
    }

    pub fn set_passphrase_cb(&self, cb: Option<Arc<dyn Callable>>) {
        let hook = self.hook();
        let old = self.inner.with_session(|s| {
            s.set_passphrase_cb(cb.as_ref().map(|_| {
                Callback::new(callbacks::passphrase as PassphraseCb, hook)
            }));
            mem::replace(&mut lock(&self.inner.callbacks).passphrase, cb)
        });
        // Dropped while holding the execution lock.
        drop(old);
    }

    /// Returns the progress callback.
    ///
    /// The callback is invoked with `(what, type, current, total)`.
    /// Errors it raises are logged and otherwise ignored.
    pub fn progress_cb(&self) -> Option<Arc<dyn Callable>> {
        let trampoline = callbacks::progress as ProgressCb as usize;
        self.inner.with_session(|s| match s.progress_cb() {
            Some(cb) if cb.func as usize == trampoline =>
                lock(&self.inner.callbacks).progress.clone(),
            _ => None,
        })
    }

    pub fn set_progress_cb(&self, cb: Option<Arc<dyn Callable>>) {
        let hook = self.hook();
        let old = self.inner.with_session(|s| {
            s.set_progress_cb(cb.as_ref().map(|_| {
                Callback::new(callbacks::progress as ProgressCb, hook)
            }));
            mem::replace(&mut lock(&self.inner.callbacks).progress, cb)
        });
        drop(old);
    }

    /// Returns the status callback.
    ///
    /// The callback is invoked with `(keyword, args)`.  Raising an
    /// error aborts the operation.
    pub fn status_cb(&self) -> Option<Arc<dyn Callable>> {
        let trampoline = callbacks::status as StatusCb as usize;
        self.inner.with_session(|s| match s.status_cb() {
            Some(cb) if cb.func as usize == trampoline =>
                lock(&self.inner.callbacks).status.clone(),
            _ => None,
        })
    }

    pub fn set_status_cb(&self, cb: Option<Arc<dyn Callable>>) {
        let hook = self.hook();
        let old = self.inner.with_session(|s| {
            s.set_status_cb(cb.as_ref().map(|_| {
                Callback::new(callbacks::status as StatusCb, hook)
            }));
            mem::replace(&mut lock(&self.inner.callbacks).status, cb)
        });
        drop(old);
    }

    /// Returns information about the backends used by this context.
    pub fn engine_info(&self) -> Vec<EngineInfo> {
        self.inner.with_session(|s| s.engine_info())
    }

    /// Changes the backend for `protocol`.
    ///
    /// `None` selects the default.
    pub fn set_engine_info(&self, protocol: Protocol, file_name: Option<&str>,
                           home_dir: Option<&str>) -> Result<()> {
        self.inner.with_session(|s| {
            s.set_engine_info(protocol, file_name, home_dir)
        }).map_err(Error::from)?;
        Ok(())
    }

    /// Sets a locale category, e.g. `libc::LC_MESSAGES`.
    pub fn set_locale(&self, category: i32, value: Option<&str>)
                      -> Result<()> {
        self.inner.with_session(|s| s.set_locale(category, value))
            .map_err(Error::from)?;
        Ok(())
    }
}

/// Converts patterns for the engine.
pub(crate) fn cstrings(patterns: &[&str]) -> Result<Vec<CString>> {
    patterns.iter()
        .map(|p| CString::new(*p).map_err(|_| Error::InvalidArgument(
            format!("Pattern {:?} contains a NUL byte", p)).into()))
        .collect()
}
