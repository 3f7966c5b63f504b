//! The embedding runtime.
//!
//! Bindings are driven by a runtime with a global execution lock:
//! only the thread holding it may run host code.  Before blocking in
//! the engine, a thread releases the lock with [`save_thread`] so that
//! other host threads can make progress, and reacquires it with
//! [`restore_thread`] afterwards, or whenever the engine calls back
//! into host code.
//!
//!   [`save_thread`]: trait.Runtime.html#tymethod.save_thread
//!   [`restore_thread`]: trait.Runtime.html#tymethod.restore_thread

use std::any::Any;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

/// The execution state of a thread that released the global lock.
///
/// Tokens are created by [`Runtime::save_thread`] and consumed by
/// [`Runtime::restore_thread`] on the same thread.
///
///   [`Runtime::save_thread`]: trait.Runtime.html#tymethod.save_thread
///   [`Runtime::restore_thread`]: trait.Runtime.html#tymethod.restore_thread
pub struct ThreadState {
    thread: ThreadId,
    payload: Box<dyn Any + Send>,
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("thread", &self.thread)
            .finish()
    }
}

impl ThreadState {
    /// Creates a token for the current thread.
    pub fn new<P: Any + Send>(payload: P) -> Self {
        ThreadState {
            thread: thread::current().id(),
            payload: Box::new(payload),
        }
    }

    /// Returns the thread that saved this state.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Returns the runtime specific payload.
    pub fn payload(&self) -> &(dyn Any + Send) {
        &*self.payload
    }
}

/// A runtime with a global execution lock.
pub trait Runtime: Send + Sync {
    /// Releases the global lock held by the calling thread.
    fn save_thread(&self) -> ThreadState;

    /// Reacquires the global lock, blocking until it is available.
    fn restore_thread(&self, state: ThreadState);
}

/// A runtime without a global lock.
///
/// Useful for callers that do not embed an interpreter.  Saving and
/// restoring are no-ops.
#[derive(Clone, Copy, Debug, Default)]
pub struct Detached;

impl Runtime for Detached {
    fn save_thread(&self) -> ThreadState {
        ThreadState::new(())
    }

    fn restore_thread(&self, _: ThreadState) {
    }
}

/// An interpreter-style global execution lock.
///
/// # Examples
///
/// ```
/// use sequoia_gpgme::runtime::{Interpreter, Runtime};
///
/// let interpreter = Interpreter::new();
/// let held = interpreter.acquire();
/// let state = interpreter.save_thread();
/// assert!(! interpreter.is_held());
/// interpreter.restore_thread(state);
/// assert!(interpreter.is_held());
/// drop(held);
/// ```
#[derive(Debug, Default)]
pub struct Interpreter {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// Proof that the current thread holds an [`Interpreter`]'s lock.
///
/// The lock is released when this is dropped.
///
///   [`Interpreter`]: struct.Interpreter.html
#[derive(Debug)]
pub struct Held<'a> {
    interpreter: &'a Interpreter,
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.interpreter.unlock();
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Default::default()
    }

    fn owner(&self) -> MutexGuard<Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquires the lock for the current thread.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds the lock.
    pub fn acquire(&self) -> Held {
        self.lock();
        Held { interpreter: self }
    }

    /// Returns whether the current thread holds the lock.
    pub fn is_held(&self) -> bool {
        *self.owner() == Some(thread::current().id())
    }

    fn lock(&self) {
        let me = thread::current().id();
        let mut owner = self.owner();
        assert!(*owner != Some(me), "interpreter lock is not reentrant");
        while owner.is_some() {
            owner = self.released.wait(owner)
                .unwrap_or_else(|e| e.into_inner());
        }
        *owner = Some(me);
    }

    fn unlock(&self) {
        let mut owner = self.owner();
        assert_eq!(*owner, Some(thread::current().id()),
                   "interpreter lock released by a thread not holding it");
        *owner = None;
        drop(owner);
        self.released.notify_one();
    }
}

impl Runtime for Interpreter {
    fn save_thread(&self) -> ThreadState {
        self.unlock();
        ThreadState::new(())
    }

    fn restore_thread(&self, state: ThreadState) {
        assert_eq!(state.thread(), thread::current().id(),
                   "thread state restored on a different thread");
        self.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn exclusive() {
        let interpreter = Arc::new(Interpreter::new());
        let inside = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4).map(|_| {
            let interpreter = interpreter.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let _held = interpreter.acquire();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        }).collect();

        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn save_lets_others_run() {
        let interpreter = Arc::new(Interpreter::new());
        let held = interpreter.acquire();
        let state = interpreter.save_thread();

        let other = interpreter.clone();
        thread::spawn(move || {
            let _held = other.acquire();
            assert!(other.is_held());
        }).join().unwrap();

        interpreter.restore_thread(state);
        assert!(interpreter.is_held());
        drop(held);
        assert!(! interpreter.is_held());
    }

    #[test]
    #[should_panic]
    fn save_without_lock() {
        Interpreter::new().save_thread();
    }
}
