//! Host streams as engine data.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use sequoia_gpgme::{
    Context, EncryptFlags, Error, ErrorCode, ExportMode, Module, SigMode,
};
use sequoia_gpgme::host::{BytesIO, HostError, Stream, Value};

const ALICE: &str = "<GnupgKeyParms format=\"internal\">
Key-Type: RSA
Name-Real: Alice
Name-Email: alice@example.org
</GnupgKeyParms>";

macro_rules! make_context {
    () => {{
        let _ = env_logger::builder().is_test(true).try_init();
        let module = Module::in_process()?;
        Context::configure(&module).ephemeral().build()?
    }};
}

/// A stream that misbehaves in a configurable way.
#[derive(Default)]
struct Faulty {
    inner: BytesIO,
    /// Returned from `read` instead of bytes.
    read_value: Option<Value>,
    /// Returned from `write` after this many bytes were written.
    write_error: Option<(usize, HostError)>,
    panic_on_read: bool,
    written: AtomicUsize,
}

impl Stream for Faulty {
    fn read(&self, size: usize) -> Result<Value, HostError> {
        if self.panic_on_read {
            panic!("read exploded");
        }
        match self.read_value.as_ref() {
            Some(v) => Ok(v.clone()),
            None => self.inner.read(size),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<(), HostError> {
        if let Some((limit, e)) = self.write_error.as_ref() {
            if self.written.load(Ordering::SeqCst) + buf.len() > *limit {
                return Err(e.clone());
            }
        }
        self.written.fetch_add(buf.len(), Ordering::SeqCst);
        self.inner.write(buf)
    }

    fn seek(&self, offset: i64, whence: i32) -> Result<(), HostError> {
        self.inner.seek(offset, whence)
    }

    fn tell(&self) -> Result<Value, HostError> {
        self.inner.tell()
    }
}

#[test]
fn streams_are_released() -> Result<()> {
    let ctx = make_context!();
    ctx.genkey(ALICE, None, None)?;

    let plain = Arc::new(BytesIO::with_data("Hello"));
    let sig = Arc::new(BytesIO::new());
    ctx.sign(plain.clone(), sig.clone(), SigMode::NORMAL)?;
    assert_eq!(Arc::strong_count(&plain), 1);
    assert_eq!(Arc::strong_count(&sig), 1);

    // Also on failure.
    let garbage = Arc::new(BytesIO::with_data("garbage"));
    let out = Arc::new(BytesIO::new());
    assert!(ctx.decrypt(garbage.clone(), out.clone()).is_err());
    assert_eq!(Arc::strong_count(&garbage), 1);
    assert_eq!(Arc::strong_count(&out), 1);
    Ok(())
}

#[test]
fn read_returns_wrong_type() -> Result<()> {
    let ctx = make_context!();
    let plain = Arc::new(Faulty {
        read_value: Some(Value::Str("not bytes".into())),
        ..Default::default()
    });

    let e = ctx.sign(plain.clone(), Arc::new(BytesIO::new()), SigMode::NORMAL)
        .unwrap_err();
    let e = Error::gpgme(&e).unwrap();
    assert_eq!(e.code(), ErrorCode::from_errno(libc::EINVAL));
    let cb = e.callback_error.as_ref().unwrap();
    assert_eq!(cb.errno, Some(libc::EINVAL));
    assert!(cb.message.contains("not bytes"));
    assert_eq!(Arc::strong_count(&plain), 1);
    Ok(())
}

#[test]
fn write_error_propagates() -> Result<()> {
    let ctx = make_context!();
    let alice = ctx.genkey(ALICE, None, None)?.fpr.unwrap();
    let alice = ctx.get_key(&alice, false)?;

    let cipher = Arc::new(Faulty {
        write_error: Some((0, HostError::os(libc::ENOSPC))),
        ..Default::default()
    });
    let e = ctx.encrypt(Some(&[&alice]), EncryptFlags::default(),
                        Arc::new(BytesIO::with_data("Hello")), cipher.clone())
        .unwrap_err();
    let e = Error::gpgme(&e).unwrap();
    assert_eq!(e.code().to_errno(), Some(libc::ENOSPC));
    assert_eq!(e.callback_error, Some(HostError::os(libc::ENOSPC)));
    assert!(cipher.inner.getvalue().is_empty());
    Ok(())
}

#[test]
fn read_panics() -> Result<()> {
    let ctx = make_context!();
    ctx.genkey(ALICE, None, None)?;

    let plain = Arc::new(Faulty { panic_on_read: true, ..Default::default() });
    let e = ctx.sign(plain, Arc::new(BytesIO::new()), SigMode::NORMAL)
        .unwrap_err();
    let e = Error::gpgme(&e).unwrap();
    assert_eq!(e.code(), ErrorCode::from_errno(libc::EINVAL));
    assert_eq!(e.callback_error.as_ref().unwrap().message, "read exploded");
    Ok(())
}

#[test]
fn large_payload() -> Result<()> {
    let ctx = make_context!();
    ctx.genkey(ALICE, None, None)?;

    let payload = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    let sig = Arc::new(BytesIO::new());
    ctx.sign(Arc::new(BytesIO::with_data(payload.clone())), sig.clone(),
             SigMode::DETACH)?;

    sig.rewind();
    let signatures = ctx.verify(sig, Some(Arc::new(BytesIO::with_data(payload))),
                                None)?;
    assert!(signatures[0].status.is_ok());
    Ok(())
}

#[test]
fn optional_streams() -> Result<()> {
    let ctx = make_context!();
    ctx.genkey(ALICE, None, None)?;

    // Exporting to the keyserver needs no stream.
    ctx.export(None, None, ExportMode::EXTERN)?;

    // Exporting locally does.
    let e = ctx.export(None, None, ExportMode::default()).unwrap_err();
    assert_eq!(Error::gpgme(&e).unwrap().code(), ErrorCode::INV_VALUE);
    Ok(())
}
