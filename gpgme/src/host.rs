//! Host values, callables and streams.
//!
//! These are the shapes in which the embedding runtime hands objects
//! to the bindings: callbacks are invoked positionally with a slice
//! of [`Value`]s, and data is read from and written to [`Stream`]s.
//! Both report failures as [`HostError`]s, the equivalent of an
//! exception raised by host code.
//!
//!   [`Value`]: enum.Value.html
//!   [`Stream`]: trait.Stream.html
//!   [`HostError`]: struct.HostError.html

use std::any::Any;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::{self, ErrorCode, ErrorSource};

/// A host value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Value::None
    }
}

impl From<Option<&str>> for Value {
    fn from(s: Option<&str>) -> Self {
        match s {
            Some(s) => Value::Str(s.into()),
            None => Value::None,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// An error raised by host code.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
    /// The OS error number, for I/O errors.
    pub errno: Option<i32>,
    /// An engine error the host code raised deliberately, e.g. to
    /// cancel an operation from a passphrase callback.
    pub gpgme: Option<engine::Error>,
}

impl HostError {
    pub fn new<M: Into<String>>(message: M) -> Self {
        HostError { message: message.into(), errno: None, gpgme: None }
    }

    /// An I/O error with the given error number.
    pub fn os(errno: i32) -> Self {
        HostError {
            message: io::Error::from_raw_os_error(errno).to_string(),
            errno: Some(errno),
            gpgme: None,
        }
    }

    /// An error carrying an engine error code.
    pub fn gpgme(error: engine::Error) -> Self {
        HostError {
            message: error.to_string(),
            errno: None,
            gpgme: Some(error),
        }
    }

    /// Shorthand for cancelling an operation.
    pub fn canceled() -> Self {
        HostError::gpgme(engine::Error::gpgme(ErrorCode::CANCELED))
    }

    /// Converts the payload of a caught panic.
    pub(crate) fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let message = panic.downcast_ref::<&str>().map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "callback panicked".into());
        HostError::new(message)
    }

    /// Returns the engine error code to report for this error.
    ///
    /// An attached engine error is passed through, an errno becomes
    /// a system error, and anything else is a general error.  Never
    /// returns success.
    pub fn to_engine_error(&self) -> engine::Error {
        let e = match (self.gpgme, self.errno) {
            (Some(e), _) => e,
            (None, Some(errno)) =>
                engine::Error::from_errno(ErrorSource::GPGME, errno),
            (None, None) => engine::Error::gpgme(ErrorCode::GENERAL),
        };

        if e.is_ok() {
            engine::Error::gpgme(ErrorCode::GENERAL)
        } else {
            e
        }
    }

    /// Returns the errno to report to the engine from a data callback.
    pub(crate) fn to_errno(&self) -> i32 {
        self.errno.unwrap_or(libc::EINVAL)
    }
}

impl From<io::Error> for HostError {
    fn from(e: io::Error) -> Self {
        HostError {
            message: e.to_string(),
            errno: e.raw_os_error(),
            gpgme: None,
        }
    }
}

/// A host callable.
pub trait Callable: Send + Sync {
    fn call(&self, args: &[Value]) -> Result<Value, HostError>;
}

impl<F> Callable for F
    where F: Fn(&[Value]) -> Result<Value, HostError> + Send + Sync
{
    fn call(&self, args: &[Value]) -> Result<Value, HostError> {
        self(args)
    }
}

/// Wraps a closure as a shareable callable.
pub fn callable<F>(f: F) -> Arc<dyn Callable>
    where F: Fn(&[Value]) -> Result<Value, HostError> + Send + Sync + 'static
{
    Arc::new(f)
}

impl fmt::Debug for dyn Callable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Callable({:p})", self)
    }
}

/// A host stream.
///
/// Streams are shared with the engine for the duration of an
/// operation, hence the methods take `&self`.
pub trait Stream: Send + Sync {
    /// Reads up to `size` bytes.
    ///
    /// Returns `Value::Bytes`, which is empty at the end of the
    /// stream.
    fn read(&self, size: usize) -> Result<Value, HostError>;

    /// Writes all of `buf`.
    fn write(&self, buf: &[u8]) -> Result<(), HostError>;

    /// Repositions the stream, `whence` being one of `SEEK_SET`,
    /// `SEEK_CUR` and `SEEK_END`.
    fn seek(&self, offset: i64, whence: i32) -> Result<(), HostError>;

    /// Returns the position as `Value::Int`.
    fn tell(&self) -> Result<Value, HostError>;
}

/// An in-memory stream.
#[derive(Debug, Default)]
pub struct BytesIO {
    cursor: Mutex<Cursor<Vec<u8>>>,
}

impl BytesIO {
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a stream positioned at the start of `data`.
    pub fn with_data<D: Into<Vec<u8>>>(data: D) -> Self {
        BytesIO { cursor: Mutex::new(Cursor::new(data.into())) }
    }

    fn cursor(&self) -> MutexGuard<Cursor<Vec<u8>>> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the whole content of the stream.
    pub fn getvalue(&self) -> Vec<u8> {
        self.cursor().get_ref().clone()
    }

    pub fn rewind(&self) {
        self.cursor().set_position(0);
    }
}

impl Stream for BytesIO {
    fn read(&self, size: usize) -> Result<Value, HostError> {
        let mut buf = Vec::with_capacity(size.min(64 * 1024));
        let mut cursor = self.cursor();
        (&mut *cursor).take(size as u64).read_to_end(&mut buf)?;
        Ok(Value::Bytes(buf))
    }

    fn write(&self, buf: &[u8]) -> Result<(), HostError> {
        let mut cursor = self.cursor();
        cursor.write_all(buf)?;
        Ok(())
    }

    fn seek(&self, offset: i64, whence: i32) -> Result<(), HostError> {
        let pos = match whence {
            libc::SEEK_SET if offset >= 0 => SeekFrom::Start(offset as u64),
            libc::SEEK_CUR => SeekFrom::Current(offset),
            libc::SEEK_END => SeekFrom::End(offset),
            _ => return Err(HostError::os(libc::EINVAL)),
        };
        let mut cursor = self.cursor();
        cursor.seek(pos)?;
        Ok(())
    }

    fn tell(&self) -> Result<Value, HostError> {
        Ok(Value::Int(self.cursor().position() as i64))
    }
}

/// Writes `data` to a file descriptor handed to a callback.
///
/// Passphrase and edit callbacks answer the engine this way.
pub fn write_fd(fd: i32, data: &[u8]) -> Result<(), HostError> {
    let mut data = data;
    while ! data.is_empty() {
        let n = unsafe {
            libc::write(fd, data.as_ptr() as *const libc::c_void, data.len())
        };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }
        data = &data[n as usize..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let e = HostError::new("boom").to_engine_error();
        assert_eq!(e.source(), ErrorSource::GPGME);
        assert_eq!(e.code(), ErrorCode::GENERAL);

        let e = HostError::os(libc::EPIPE).to_engine_error();
        assert_eq!(e.code(), ErrorCode::from_errno(libc::EPIPE));

        assert_eq!(HostError::canceled().to_engine_error().code(),
                   ErrorCode::CANCELED);
        assert_eq!(HostError::gpgme(engine::Error::NONE).to_engine_error()
                   .code(), ErrorCode::GENERAL);

        assert_eq!(HostError::new("x").to_errno(), libc::EINVAL);
        assert_eq!(HostError::os(libc::ENOSPC).to_errno(), libc::ENOSPC);
    }

    #[test]
    fn bytesio() {
        let b = BytesIO::with_data(&b"hello world"[..]);
        assert_eq!(b.read(5).unwrap(), Value::Bytes(b"hello".to_vec()));
        assert_eq!(b.tell().unwrap(), Value::Int(5));
        b.seek(-5, libc::SEEK_END).unwrap();
        assert_eq!(b.read(100).unwrap(), Value::Bytes(b"world".to_vec()));
        assert_eq!(b.read(100).unwrap(), Value::Bytes(vec![]));
        assert!(b.seek(-1, libc::SEEK_SET).is_err());
        b.write(b"!").unwrap();
        assert_eq!(b.getvalue(), b"hello world!");
    }

    #[test]
    fn panics() {
        let p = std::panic::catch_unwind(|| panic!("oops")).unwrap_err();
        assert_eq!(HostError::from_panic(p).message, "oops");
    }

    #[test]
    fn closures() {
        let c = |args: &[Value]| -> Result<Value, HostError> {
            Ok(Value::Int(args.len() as i64))
        };
        assert_eq!(Callable::call(&c, &[Value::None, Value::Bool(true)]),
                   Ok(Value::Int(2)));
    }
}
