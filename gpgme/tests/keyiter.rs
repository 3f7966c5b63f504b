//! Key listings.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use sequoia_gpgme::{Context, Error, KeyIter, Module, SigMode};
use sequoia_gpgme::engine::memory;
use sequoia_gpgme::host::{callable, BytesIO, Value};
use sequoia_gpgme::runtime::Detached;

const ALICE: &str = "<GnupgKeyParms format=\"internal\">
Key-Type: RSA
Name-Real: Alice
Name-Email: alice@example.org
</GnupgKeyParms>";

const BOB: &str = "<GnupgKeyParms format=\"internal\">
Key-Type: RSA
Name-Real: Bob
Name-Email: bob@example.org
</GnupgKeyParms>";

const CAROL: &str = "<GnupgKeyParms format=\"internal\">
Key-Type: RSA
Name-Real: Carol
Name-Email: carol@example.org
</GnupgKeyParms>";

/// Returns a context and the engine backing it.
fn setup() -> Result<(Context, memory::Engine)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = memory::Engine::new();
    let module = Module::init(Arc::new(engine.clone()), Arc::new(Detached))?;
    let ctx = Context::configure(&module).ephemeral().build()?;
    Ok((ctx, engine))
}

#[test]
fn empty_keyring() -> Result<()> {
    let (ctx, engine) = setup()?;
    let mut keys = ctx.keylist(None, false)?;
    assert!(keys.next().is_none());
    assert_eq!(engine.keylist_end_calls(), 1);

    // Fused.
    assert!(keys.next().is_none());
    drop(keys);
    assert_eq!(engine.keylist_end_calls(), 1);
    Ok(())
}

#[test]
fn exhaustion() -> Result<()> {
    let (ctx, engine) = setup()?;
    for params in &[ALICE, BOB, CAROL] {
        ctx.genkey(params, None, None)?;
    }

    let keys = ctx.keylist(None, false)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(keys.len(), 3);
    let names = keys.iter()
        .map(|k| k.primary_uid().unwrap().name.clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
    assert_eq!(engine.keylist_end_calls(), 1);
    Ok(())
}

#[test]
fn early_drop() -> Result<()> {
    let (ctx, engine) = setup()?;
    for params in &[ALICE, BOB, CAROL] {
        ctx.genkey(params, None, None)?;
    }

    let mut keys = ctx.keylist(None, false)?;
    assert!(keys.next().is_some());
    assert_eq!(engine.keylist_end_calls(), 0);
    drop(keys);
    assert_eq!(engine.keylist_end_calls(), 1);
    Ok(())
}

#[test]
fn release() -> Result<()> {
    let (ctx, engine) = setup()?;
    ctx.genkey(ALICE, None, None)?;

    let mut keys = ctx.keylist(None, false)?;
    keys.release();
    keys.release();
    assert!(keys.next().is_none());
    drop(keys);
    assert_eq!(engine.keylist_end_calls(), 1);

    // The context is free for other operations.
    assert_eq!(ctx.keylist(None, false)?.count(), 1);
    Ok(())
}

#[test]
fn patterns() -> Result<()> {
    let (ctx, _) = setup()?;
    let alice = ctx.genkey(ALICE, None, None)?.fpr.unwrap();
    ctx.genkey(BOB, None, None)?;

    let found = ctx.keylist(Some(&["alice"]), false)?
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].fpr(), Some(alice.as_str()));

    let patterns = ["<bob@example.org>", alice.as_str()];
    let found = ctx.keylist(Some(&patterns), false)?
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(found.len(), 2);

    assert_eq!(ctx.keylist(Some(&["dave"]), false)?.count(), 0);
    Ok(())
}

#[test]
fn secret_only() -> Result<()> {
    let (ctx, _) = setup()?;
    ctx.genkey(ALICE, None, None)?;

    let keys = ctx.keylist(None, true)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].secret);
    Ok(())
}

#[test]
fn bad_pattern() -> Result<()> {
    let (ctx, engine) = setup()?;
    let e = ctx.keylist(Some(&["a\0b"]), false).unwrap_err();
    assert!(matches!(e.downcast_ref::<Error>(),
                     Some(Error::InvalidArgument(_))));
    assert_eq!(engine.keylist_end_calls(), 0);
    Ok(())
}

#[test]
fn outlives_other_handles() -> Result<()> {
    let (ctx, engine) = setup()?;
    ctx.genkey(ALICE, None, None)?;

    let keys = ctx.keylist(None, false)?;
    drop(ctx);
    assert_eq!(keys.count(), 1);
    assert_eq!(engine.keylist_end_calls(), 1);
    Ok(())
}

#[test]
fn dropped_within_a_callback() -> Result<()> {
    let (ctx, engine) = setup()?;
    ctx.genkey(ALICE, None, None)?;

    let keys: Arc<Mutex<Option<KeyIter>>> =
        Arc::new(Mutex::new(Some(ctx.keylist(None, false)?)));
    let k = keys.clone();
    ctx.set_status_cb(Some(callable(move |_| {
        drop(k.lock().unwrap().take());
        Ok(Value::None)
    })));

    ctx.sign(Arc::new(BytesIO::with_data("Hello")), Arc::new(BytesIO::new()),
             SigMode::NORMAL)?;
    assert!(keys.lock().unwrap().is_none());
    assert_eq!(engine.keylist_end_calls(), 1);

    ctx.set_status_cb(None);
    assert_eq!(ctx.keylist(None, false)?.count(), 1);
    assert_eq!(engine.keylist_end_calls(), 2);
    Ok(())
}
