//! Positional I/O primitives shared by all modes.
//!
//! Reads and writes retry on `EINTR` and report short transfers with a
//! tagged outcome instead of an errno side channel: a short read with
//! [`ReadOutcome::Eof`] is end of file, one with [`ReadOutcome::Error`]
//! is a media error at `pos + bytes_read`.

use std::fs::File;
use std::io::{self, ErrorKind};

/// Byte source with positional reads. Implemented by the input device
/// and by fault-injecting doubles in tests.
pub trait Source {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize>;

    /// Device length, when the backend can tell.
    fn size(&self) -> Option<i64> {
        None
    }
}

/// Byte sink with positional reads and writes. Reads are used by the
/// generating mode and the sparse bookkeeping.
pub trait Target {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize>;
    fn write_at(&self, buf: &[u8], pos: u64) -> io::Result<usize>;
    fn sync(&self) -> io::Result<()>;
    fn len(&self) -> io::Result<u64>;
}

pub struct FileSource {
    file: File,
    size: Option<i64>,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl FileSource {
    pub fn open(path: &std::path::Path) -> io::Result<FileSource> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        let size = if meta.len() > 0 {
            Some(meta.len().min(i64::MAX as u64) as i64)
        } else {
            None // devices report zero; the size must come from elsewhere
        };
        Ok(FileSource {
            file,
            size,
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        })
    }
}

impl Source for FileSource {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, pos)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self.lock.lock().unwrap();
            let mut f = &self.file;
            f.seek(SeekFrom::Start(pos))?;
            f.read(buf)
        }
    }

    fn size(&self) -> Option<i64> {
        self.size
    }
}

pub struct FileTarget {
    file: File,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl FileTarget {
    pub fn open(path: &std::path::Path) -> io::Result<FileTarget> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(FileTarget {
            file,
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        })
    }
}

impl Target for FileTarget {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, pos)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self.lock.lock().unwrap();
            let mut f = &self.file;
            f.seek(SeekFrom::Start(pos))?;
            f.read(buf)
        }
    }

    fn write_at(&self, buf: &[u8], pos: u64) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.write_at(buf, pos)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let _guard = self.lock.lock().unwrap();
            let mut f = &self.file;
            f.seek(SeekFrom::Start(pos))?;
            f.write(buf)
        }
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    /// The whole buffer was filled.
    Complete,
    /// The device ended before the buffer was full.
    Eof,
    /// The device errored after the returned prefix.
    Error(io::Error),
}

/// Read `buf.len()` bytes at `pos`, retrying `EINTR`, returning the
/// prefix actually read and how the transfer ended.
pub fn read_block(src: &dyn Source, buf: &mut [u8], pos: i64) -> (usize, ReadOutcome) {
    read_loop(|b, p| src.read_at(b, p), buf, pos)
}

/// Same transfer loop against the output side; the generating mode
/// scans an existing copy.
pub fn read_block_target(out: &dyn Target, buf: &mut [u8], pos: i64) -> (usize, ReadOutcome) {
    read_loop(|b, p| out.read_at(b, p), buf, pos)
}

fn read_loop<F>(mut read_at: F, buf: &mut [u8], pos: i64) -> (usize, ReadOutcome)
where
    F: FnMut(&mut [u8], u64) -> io::Result<usize>,
{
    debug_assert!(pos >= 0);
    let mut got = 0;
    while got < buf.len() {
        match read_at(&mut buf[got..], pos as u64 + got as u64) {
            Ok(0) => return (got, ReadOutcome::Eof),
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (got, ReadOutcome::Error(e)),
        }
    }
    (got, ReadOutcome::Complete)
}

/// Write all of `buf` at `pos`; any short transfer is an error.
pub fn write_block(out: &dyn Target, buf: &[u8], pos: i64) -> io::Result<()> {
    debug_assert!(pos >= 0);
    let mut written = 0;
    while written < buf.len() {
        match out.write_at(&buf[written..], pos as u64 + written as u64) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "device accepted no bytes",
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Durable-sync the target; `EINVAL` means the destination does not
/// support syncing and is ignored.
pub fn sync_target(out: &dyn Target) -> io::Result<()> {
    match out.sync() {
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(()),
        other => other,
    }
}

pub fn is_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}
