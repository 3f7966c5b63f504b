//! Key listings.

use std::fmt;
use std::iter::FusedIterator;

use crate::engine::{ErrorSource, Key};
use crate::{Context, Error, Result};

/// A cursor over a key listing.
///
/// Created by [`Context::keylist`].  Keys are fetched from the engine
/// one at a time.  The listing is ended once the iterator is
/// exhausted, explicitly released, or dropped, whichever comes
/// first.
///
///   [`Context::keylist`]: struct.Context.html#method.keylist
pub struct KeyIter {
    /// `None` once the listing ended.
    ctx: Option<Context>,
}

impl fmt::Debug for KeyIter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyIter")
            .field("done", &self.ctx.is_none())
            .finish()
    }
}

impl KeyIter {
    pub(crate) fn new(ctx: Context) -> Self {
        KeyIter { ctx: Some(ctx) }
    }

    /// Ends the listing.
    ///
    /// Further calls to `next` return `None`.  Releasing twice is
    /// harmless.
    pub fn release(&mut self) {
        self.finish()
    }

    fn finish(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            if ctx.inner.in_callback() {
                // The session is busy with the operation that invoked
                // the callback.
                log::debug!("Deferring end of key listing");
                ctx.inner.defer_keylist_end();
                return;
            }
            if let Err(e) = ctx.inner.with_session(|s| s.op_keylist_end()) {
                log::warn!("Ending key listing failed: {}", e);
            }
        }
    }
}

impl Iterator for KeyIter {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        let ctx = self.ctx.as_ref()?;
        let r = {
            let mut s = ctx.inner.begin();
            let r = s.op_keylist_next();
            s.conclude(r)
        };

        match r {
            Ok(key) => Some(Ok(key)),
            Err(e) if e.error.is_eof() && e.source() == ErrorSource::GPGME => {
                self.finish();
                None
            },
            Err(e) => Some(Err(Error::Gpgme(e).into())),
        }
    }
}

impl FusedIterator for KeyIter {}

impl Drop for KeyIter {
    fn drop(&mut self) {
        self.finish()
    }
}
