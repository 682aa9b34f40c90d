//! Named channel (FIFO) helpers used by both the server and the client.
//!
//! Opening a FIFO blocks until the other end is opened too, except through
//! [`try_open_writer`], which fails fast with `ConnectionRefused` when nobody
//! is reading.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

/// Creates a FIFO at `path`, replacing whatever stale entry was there.
pub fn create(path: &Path) -> io::Result<()> {
    remove(path)?;
    let c_path = c_path(path)?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Removes the FIFO at `path`. A missing entry is not an error.
pub fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// True when `path` names an existing FIFO.
pub fn is_fifo(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

/// Opens the read end, blocking until a writer shows up.
pub fn open_reader(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

/// Opens the write end, blocking until a reader shows up.
pub fn open_writer(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

/// Opens both ends at once. Never blocks and never sees end-of-channel while
/// the returned handle is alive, since it counts as a writer itself.
pub fn open_read_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Opens the write end without waiting for a reader.
///
/// Fails with `ConnectionRefused` when the FIFO does not exist or has no
/// reader. On success the descriptor is switched back to blocking mode.
pub fn try_open_writer(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| match e.raw_os_error() {
            Some(libc::ENXIO) | Some(libc::ENOENT) => io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no reader on {}", path.display()),
            ),
            _ => e,
        })?;
    set_blocking(file.as_raw_fd())?;
    Ok(file)
}

/// Opens the write end, giving a reader up to `patience` to show up.
///
/// Fails with `NotFound` when there is no entry at `path` and with
/// `TimedOut` when no reader arrived in time.
pub fn open_writer_within(path: &Path, patience: Duration) -> io::Result<File> {
    let deadline = Instant::now() + patience;
    loop {
        match try_open_writer(path) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {}
            Err(e) => return Err(e),
        }
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reader on {} within {:?}", path.display(), patience),
            ));
        }
        thread::sleep(READER_RETRY.min(deadline - now));
    }
}

/// Pause between two attempts of [`open_writer_within`].
const READER_RETRY: Duration = Duration::from_millis(5);

fn set_blocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fd is owned by a live File for the duration of both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Blocks until `fd` is readable or `timeout` elapses.
///
/// Returns `Ok(true)` when a read would not block, which includes a closed
/// remote end. A signal interrupting the wait counts as a timeout.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: pollfd is a single valid entry living on this stack frame.
    let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::path::PathBuf;

    fn temp_fifo(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fifo_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn test_create_and_remove() {
        let path = temp_fifo("create");
        create(&path).unwrap();
        assert!(is_fifo(&path));

        // Creating again replaces the stale entry.
        create(&path).unwrap();
        assert!(is_fifo(&path));

        remove(&path).unwrap();
        assert!(!path.exists());
        remove(&path).unwrap();
    }

    #[test]
    fn test_try_open_writer_without_reader() {
        let path = temp_fifo("noreader");
        create(&path).unwrap();

        let err = try_open_writer(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

        remove(&path).unwrap();
        let err = try_open_writer(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_try_open_writer_with_reader() {
        let path = temp_fifo("reader");
        create(&path).unwrap();

        let mut reader = open_read_write(&path).unwrap();
        let mut writer = try_open_writer(&path).unwrap();
        writer.write_all(b"hi").unwrap();

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");

        remove(&path).unwrap();
    }

    #[test]
    fn test_open_writer_within_waits_for_reader() {
        let path = temp_fifo("patient");
        create(&path).unwrap();

        let start = Instant::now();
        let err = open_writer_within(&path, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));

        let reader_path = path.clone();
        let reader = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let mut reader = open_reader(&reader_path).unwrap();
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf).unwrap();
            buf[0]
        });
        let mut writer = open_writer_within(&path, Duration::from_secs(2)).unwrap();
        writer.write_all(&[7]).unwrap();
        drop(writer);
        assert_eq!(reader.join().unwrap(), 7);

        remove(&path).unwrap();
        let err = open_writer_within(&path, Duration::from_secs(2)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_wait_readable() {
        let path = temp_fifo("poll");
        create(&path).unwrap();
        let reader = open_read_write(&path).unwrap();

        assert!(!wait_readable(reader.as_raw_fd(), Duration::from_millis(20)).unwrap());

        let mut writer = open_writer(&path).unwrap();
        writer.write_all(&[1]).unwrap();
        assert!(wait_readable(reader.as_raw_fd(), Duration::from_millis(20)).unwrap());

        remove(&path).unwrap();
    }
}
