//! Data objects.
//!
//! A data object is the engine's byte source or sink.  The embedder
//! provides a callback table and an opaque handle; the engine reads,
//! writes and seeks through the table and releases the handle when
//! the data object is dropped.

use std::fmt;
use std::io;

use libc::{c_int, c_void, off_t, ssize_t};

use crate::abi::DataCbs;
use crate::{Error, ErrorCode, Result};

/// A data object backed by a callback table.
pub struct Data {
    cbs: &'static DataCbs,
    handle: *mut c_void,
    released: bool,
}

// The handle is only used through the callbacks, which the embedder
// makes callable from the thread driving the operation.
unsafe impl Send for Data {}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Data")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

impl Data {
    /// Creates a data object from a callback table.
    ///
    /// On error, ownership of `handle` stays with the caller and the
    /// release callback is not invoked.
    ///
    /// # Safety
    ///
    /// `handle` must remain valid until the release callback is
    /// invoked, and the callbacks must be safe to call with it.
    pub unsafe fn from_cbs(cbs: &'static DataCbs, handle: *mut c_void)
                           -> Result<Self> {
        if cbs.read.is_none() && cbs.write.is_none() {
            return Err(Error::gpgme(ErrorCode::INV_VALUE));
        }

        Ok(Data { cbs, handle, released: false })
    }

    /// Reads the rest of the data.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        io::Read::read_to_end(self, &mut buf)?;
        Ok(buf)
    }

    /// Rewinds the data, if it supports seeking.
    ///
    /// Not being able to seek is not an error.
    pub fn rewind(&mut self) -> io::Result<()> {
        if self.cbs.seek.is_some() {
            io::Seek::seek(self, io::SeekFrom::Start(0))?;
        }
        Ok(())
    }
}

impl io::Read for Data {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.cbs.read.ok_or_else(|| {
            io::Error::from_raw_os_error(libc::EBADF)
        })?;

        let r: ssize_t = unsafe {
            read(self.handle, buf.as_mut_ptr() as *mut c_void, buf.len())
        };
        if r < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(r as usize)
        }
    }
}

impl io::Write for Data {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let write = self.cbs.write.ok_or_else(|| {
            io::Error::from_raw_os_error(libc::EBADF)
        })?;

        let r: ssize_t = unsafe {
            write(self.handle, buf.as_ptr() as *const c_void, buf.len())
        };
        if r < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(r as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for Data {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let seek = self.cbs.seek.ok_or_else(|| {
            io::Error::from_raw_os_error(libc::ESPIPE)
        })?;

        let (offset, whence) = match pos {
            io::SeekFrom::Start(o) => (o as off_t, libc::SEEK_SET),
            io::SeekFrom::Current(o) => (o as off_t, libc::SEEK_CUR),
            io::SeekFrom::End(o) => (o as off_t, libc::SEEK_END),
        };

        let r = unsafe { seek(self.handle, offset, whence as c_int) };
        if r < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(r as u64)
        }
    }
}

impl Drop for Data {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(release) = self.cbs.release {
            unsafe { release(self.handle) }
        }
    }
}
