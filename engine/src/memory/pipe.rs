//! Answer channels for callbacks.
//!
//! Passphrase and edit callbacks answer by writing to a file
//! descriptor.  We hand out the write end of a pipe.  A reader thread
//! drains the read end while the callback runs, so answers larger
//! than the pipe buffer do not block the writer.

use std::fs::File;
use std::io::{self, Read};
use std::thread::JoinHandle;

use libc::c_int;

use crate::{Error, ErrorSource};

pub(crate) struct Pipe {
    reader: Option<JoinHandle<io::Result<Vec<u8>>>>,
    write: Option<File>,
}

#[cfg(unix)]
impl Pipe {
    pub fn new() -> io::Result<Self> {
        use std::os::unix::io::FromRawFd;

        let mut fds: [c_int; 2] = [-1, -1];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: pipe(2) returned two fresh descriptors we own.
        let (mut read, write) = unsafe {
            (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1]))
        };

        let reader = std::thread::Builder::new()
            .name("answer-pipe".into())
            .spawn(move || {
                let mut answer = Vec::new();
                read.read_to_end(&mut answer)?;
                Ok(answer)
            })?;

        Ok(Pipe {
            reader: Some(reader),
            write: Some(write),
        })
    }

    /// Returns the descriptor the callback writes to.
    pub fn fd(&self) -> c_int {
        use std::os::unix::io::AsRawFd;
        self.write.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1)
    }
}

#[cfg(not(unix))]
impl Pipe {
    pub fn new() -> io::Result<Self> {
        Err(io::Error::new(io::ErrorKind::Other,
                           "Answer channels need a Unix system"))
    }

    pub fn fd(&self) -> c_int {
        -1
    }
}

impl Pipe {
    /// Closes the write end and returns what was written.
    ///
    /// A single trailing newline is stripped.
    pub fn finish(mut self) -> io::Result<String> {
        drop(self.write.take());
        let mut answer = match self.reader.take() {
            Some(reader) => reader.join().map_err(|_| {
                io::Error::new(io::ErrorKind::Other,
                               "Answer pipe reader panicked")
            })??,
            None => Vec::new(),
        };
        if answer.last() == Some(&b'\n') {
            answer.pop();
            if answer.last() == Some(&b'\r') {
                answer.pop();
            }
        }
        String::from_utf8(answer).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, e)
        })
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        // Closing the write end ends the reader.
        drop(self.write.take());
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// Maps pipe failures to engine errors.
pub(crate) fn error(e: io::Error) -> Error {
    Error::from_io(ErrorSource::GPGME, &e)
}
