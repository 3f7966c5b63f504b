//! The engine handle's locking discipline.
//!
//! These tests run contexts under an interpreter-style runtime with a
//! global execution lock, and check that the lock is held whenever
//! host code runs and released whenever a thread waits for the
//! engine.

use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;

use sequoia_gpgme::{
    Context, EncryptFlags, Error, Module, SigMode, SigNotation,
};
use sequoia_gpgme::engine::memory;
use sequoia_gpgme::host::{
    callable, write_fd, BytesIO, HostError, Stream, Value,
};
use sequoia_gpgme::runtime::{Interpreter, Runtime};

const PROTECTED: &str = "<GnupgKeyParms format=\"internal\">
Key-Type: RSA
Name-Real: Bob
Name-Email: bob@example.org
Passphrase: abc
</GnupgKeyParms>";

/// Returns a context running under `interpreter`.
fn interpreted(interpreter: &Arc<Interpreter>) -> Result<Context> {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = Module::init(Arc::new(memory::Engine::new()),
                              interpreter.clone())?;
    Context::configure(&module).ephemeral().build()
}

/// A stream recording whether the interpreter lock was held on
/// every call.
struct Observed {
    inner: BytesIO,
    interpreter: Arc<Interpreter>,
    held: Arc<Mutex<Vec<bool>>>,
}

impl Observed {
    fn note(&self) {
        self.held.lock().unwrap().push(self.interpreter.is_held());
    }
}

impl Stream for Observed {
    fn read(&self, size: usize) -> std::result::Result<Value, HostError> {
        self.note();
        self.inner.read(size)
    }

    fn write(&self, buf: &[u8]) -> std::result::Result<(), HostError> {
        self.note();
        self.inner.write(buf)
    }

    fn seek(&self, offset: i64, whence: i32)
            -> std::result::Result<(), HostError> {
        self.note();
        self.inner.seek(offset, whence)
    }

    fn tell(&self) -> std::result::Result<Value, HostError> {
        self.inner.tell()
    }
}

/// Installs callbacks that record whether the interpreter lock is
/// held, and answer passphrase requests with "abc".
fn observe(ctx: &Context, interpreter: &Arc<Interpreter>,
           held: &Arc<Mutex<Vec<bool>>>) {
    let (i, h) = (interpreter.clone(), held.clone());
    ctx.set_passphrase_cb(Some(callable(move |args| {
        h.lock().unwrap().push(i.is_held());
        let fd = args[3].as_int().unwrap_or(-1) as i32;
        write_fd(fd, b"abc\n")?;
        Ok(Value::None)
    })));

    let (i, h) = (interpreter.clone(), held.clone());
    ctx.set_progress_cb(Some(callable(move |_| {
        h.lock().unwrap().push(i.is_held());
        Ok(Value::None)
    })));

    let (i, h) = (interpreter.clone(), held.clone());
    ctx.set_status_cb(Some(callable(move |_| {
        h.lock().unwrap().push(i.is_held());
        Ok(Value::None)
    })));
}

#[test]
fn host_code_runs_under_the_lock() -> Result<()> {
    let interpreter = Arc::new(Interpreter::new());
    let _held = interpreter.acquire();
    let ctx = interpreted(&interpreter)?;

    let held = Arc::new(Mutex::new(Vec::new()));
    observe(&ctx, &interpreter, &held);

    ctx.genkey(PROTECTED, None, None)?;
    assert!(interpreter.is_held());

    let plain = Arc::new(Observed {
        inner: BytesIO::with_data("Hello"),
        interpreter: interpreter.clone(),
        held: held.clone(),
    });
    let sig = Arc::new(Observed {
        inner: BytesIO::new(),
        interpreter: interpreter.clone(),
        held: held.clone(),
    });
    ctx.sign(plain, sig, SigMode::NORMAL)?;
    assert!(interpreter.is_held());

    let held = held.lock().unwrap();
    // Progress, status, passphrase, reads and writes.
    assert!(held.len() > 10);
    assert!(held.iter().all(|h| *h));
    Ok(())
}

#[test]
fn threads_share_the_interpreter() -> Result<()> {
    let interpreter = Arc::new(Interpreter::new());
    let ctx = {
        let _held = interpreter.acquire();
        let ctx = interpreted(&interpreter)?;
        ctx.genkey(PROTECTED, None, None)?;
        ctx
    };

    let held = Arc::new(Mutex::new(Vec::new()));
    {
        let _held = interpreter.acquire();
        observe(&ctx, &interpreter, &held);
    }

    let workers = (0..4).map(|n| {
        let ctx = ctx.clone();
        let interpreter = interpreter.clone();
        thread::spawn(move || -> Result<()> {
            let _held = interpreter.acquire();
            for i in 0..8 {
                let sig = Arc::new(BytesIO::new());
                let plain = BytesIO::with_data(format!("{}/{}", n, i));
                ctx.sign(Arc::new(plain), sig.clone(), SigMode::DETACH)?;
                // Other threads may reconfigure the context while
                // this one waits for the engine.
                ctx.set_armor(i % 2 == 0);
                assert!(interpreter.is_held());
            }
            Ok(())
        })
    }).collect::<Vec<_>>();

    for w in workers {
        w.join().expect("worker panicked")?;
    }

    let _held = interpreter.acquire();
    ctx.set_passphrase_cb(None);
    ctx.set_progress_cb(None);
    ctx.set_status_cb(None);

    let held = held.lock().unwrap();
    assert!(! held.is_empty());
    assert!(held.iter().all(|h| *h));
    Ok(())
}

#[test]
fn waiting_for_a_busy_context_releases_the_lock() -> Result<()> {
    let interpreter = Arc::new(Interpreter::new());
    let _held = interpreter.acquire();
    let ctx = interpreted(&interpreter)?;
    ctx.genkey(PROTECTED, None, None)?;

    let waiter: Arc<Mutex<Option<thread::JoinHandle<bool>>>> =
        Default::default();
    let (i, c, w) = (interpreter.clone(), ctx.clone(), waiter.clone());
    ctx.set_status_cb(Some(callable(move |args| {
        // While the first status line is being handled, start a
        // thread that queries the context.  It acquires the lock as
        // soon as this thread waits for the engine, and then has to
        // give it up again while it waits for the context.
        if args[0].as_str() == Some("NEED_PASSPHRASE") {
            let (i, c) = (i.clone(), c.clone());
            *w.lock().unwrap() = Some(thread::spawn(move || {
                let _held = i.acquire();
                c.armor()
            }));
        }
        Ok(Value::None)
    })));
    ctx.set_passphrase_cb(Some(callable(|args| {
        write_fd(args[3].as_int().unwrap_or(-1) as i32, b"abc\n")?;
        Ok(Value::None)
    })));

    ctx.sign(Arc::new(BytesIO::with_data("Hello")), Arc::new(BytesIO::new()),
             SigMode::NORMAL)?;

    let handle = waiter.lock().unwrap().take().expect("waiter started");
    // Let the waiter have the lock.
    let armor = {
        let state = interpreter.save_thread();
        let armor = handle.join().expect("waiter panicked");
        interpreter.restore_thread(state);
        armor
    };
    assert!(! armor);

    ctx.set_status_cb(None);
    Ok(())
}

#[test]
fn reentrant_use_fails_the_operation() -> Result<()> {
    let interpreter = Arc::new(Interpreter::new());
    let _held = interpreter.acquire();
    let ctx = interpreted(&interpreter)?;

    let c = ctx.clone();
    ctx.set_passphrase_cb(Some(callable(move |_| {
        // Deadlocks unless detected.
        c.set_armor(true);
        Ok(Value::None)
    })));

    let e = ctx.encrypt(None, EncryptFlags::default(),
                        Arc::new(BytesIO::with_data("Hello")),
                        Arc::new(BytesIO::new()))
        .unwrap_err();
    let e = Error::gpgme(&e).unwrap();
    let cb = e.callback_error.as_ref().unwrap();
    assert!(cb.message.contains("own callbacks"));
    assert!(interpreter.is_held());

    // The context survived.
    ctx.set_passphrase_cb(None);
    assert!(! ctx.armor());
    Ok(())
}

/// Notations all carrying `value`; their number is derived from it.
fn notations(value: u8) -> Vec<SigNotation> {
    (0..(value % 5) + 1).map(|_| SigNotation {
        name: Some("tag@example.org".into()),
        value: vec![value],
        flags: Default::default(),
    }).collect()
}

#[quickcheck_macros::quickcheck]
fn notations_are_replaced_atomically(values: Vec<u8>) -> bool {
    let module = match Module::in_process() {
        Ok(m) => m,
        Err(_) => return false,
    };
    let ctx = match Context::configure(&module).ephemeral().build() {
        Ok(c) => c,
        Err(_) => return false,
    };

    let writers = values.into_iter().take(8).map(|v| {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.set_sig_notations(&notations(v)).is_ok())
    }).collect::<Vec<_>>();

    let mut consistent = true;
    for _ in 0..32 {
        let seen = ctx.sig_notations();
        if let Some(first) = seen.first() {
            consistent &= seen == notations(first.value[0]);
        }
    }

    writers.into_iter().all(|w| w.join().unwrap_or(false)) && consistent
}
