//! Pipe primitives for dispatcher/worker communication.
//!
//! Provides the [`Actor`] duplex channel (two unidirectional pipes) and
//! buffered line I/O over pipe ends with EINTR handling.

use crate::error::{Result, SpawnError};
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
#[derive(Debug)]
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    /// Create from an owned file descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }

    /// Duplicate the descriptor.
    #[cfg(test)]
    pub fn try_clone(&self) -> io::Result<Self> {
        self.fd.try_clone().map(Self::new)
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(()) // Pipes don't need flushing at the fd level
    }
}

/// Buffered line reader over a pipe end.
pub struct LineReader {
    reader: BufReader<PipeFd>,
    line_buffer: String,
}

impl LineReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, fd),
            line_buffer: String::with_capacity(4096),
        }
    }

    /// Read a line, returning a reference to the internal buffer.
    /// Returns `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        match self.reader.read_line(&mut self.line_buffer)? {
            0 => Ok(None),
            _ => {
                if self.line_buffer.ends_with('\n') {
                    self.line_buffer.pop();
                }
                Ok(Some(&self.line_buffer))
            }
        }
    }
}

/// Buffered line writer over a pipe end.
///
/// Every line is flushed with a single `write(2)` when it fits in the
/// buffer, which keeps short lines atomic on a pipe shared by many writers.
pub struct LineWriter {
    writer: BufWriter<PipeFd>,
}

impl LineWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, fd),
        }
    }

    /// Write a line (appends newline if not present) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

/// Set or clear `FD_CLOEXEC` on a descriptor.
pub(crate) fn set_cloexec(fd: impl AsFd, enabled: bool) -> nix::Result<()> {
    let flags = if enabled {
        FdFlag::FD_CLOEXEC
    } else {
        FdFlag::empty()
    };
    fcntl(fd, FcntlArg::F_SETFD(flags)).map(drop)
}

/// Create a pipe whose ends are not inherited by spawned processes.
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        let (read_end, write_end) = nix::unistd::pipe()?;
        set_cloexec(&read_end, true)?;
        set_cloexec(&write_end, true)?;
        Ok((read_end, write_end))
    }
}

/// Raw descriptor numbers of one pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeFds {
    pub read: RawFd,
    pub write: RawFd,
}

/// Raw descriptor numbers of one duplex channel, in inheritance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorFds {
    pub input: PipeFds,
    pub output: PipeFds,
}

impl ActorFds {
    /// The four descriptors as input.read, input.write, output.read, output.write.
    pub fn to_array(self) -> [RawFd; 4] {
        [
            self.input.read,
            self.input.write,
            self.output.read,
            self.output.write,
        ]
    }
}

/// One unidirectional pipe. Either end may be taken or closed independently.
#[derive(Debug)]
pub struct Pipe {
    read_end: Option<PipeFd>,
    write_end: Option<PipeFd>,
}

impl Pipe {
    /// Create a new pipe.
    pub fn open() -> Result<Self> {
        let (read_end, write_end) = cloexec_pipe()
            .map_err(|e| SpawnError::Bootstrap(format!("Failed to create pipe: {}", e)))?;
        Ok(Self {
            read_end: Some(PipeFd::new(read_end)),
            write_end: Some(PipeFd::new(write_end)),
        })
    }

    /// Adopt a pipe from descriptors inherited from the parent process.
    ///
    /// # Safety
    /// Both descriptors must be open in this process and owned by nobody else.
    unsafe fn from_fds(fds: PipeFds) -> Result<Self> {
        let read_end = unsafe { adopt_inherited(fds.read)? };
        let write_end = unsafe { adopt_inherited(fds.write)? };
        Ok(Self {
            read_end: Some(read_end),
            write_end: Some(write_end),
        })
    }

    fn fds(&self) -> Option<PipeFds> {
        Some(PipeFds {
            read: self.read_end.as_ref()?.as_raw_fd(),
            write: self.write_end.as_ref()?.as_raw_fd(),
        })
    }

    /// Take ownership of the read end, leaving the pipe without one.
    pub fn take_read_end(&mut self) -> Option<PipeFd> {
        self.read_end.take()
    }

    /// Take ownership of the write end, leaving the pipe without one.
    pub fn take_write_end(&mut self) -> Option<PipeFd> {
        self.write_end.take()
    }

    pub fn close(&mut self) {
        self.read_end = None;
        self.write_end = None;
    }

    /// Duplicate the read end while the pipe keeps its own.
    #[cfg(test)]
    pub fn dup_read_end(&self) -> Option<PipeFd> {
        self.read_end.as_ref()?.try_clone().ok()
    }

    /// Duplicate the write end while the pipe keeps its own.
    #[cfg(test)]
    pub fn dup_write_end(&self) -> Option<PipeFd> {
        self.write_end.as_ref()?.try_clone().ok()
    }
}

/// Take ownership of an inherited descriptor after checking it is open.
///
/// Close-on-exec is restored so the descriptor does not leak further into
/// processes the worker itself spawns.
///
/// # Safety
/// `fd` must not be owned by anything else in this process.
unsafe fn adopt_inherited(fd: RawFd) -> Result<PipeFd> {
    if fd < 0 {
        return Err(SpawnError::Bootstrap(format!(
            "Invalid inherited descriptor {}",
            fd
        )));
    }
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    fcntl(borrowed, FcntlArg::F_GETFD).map_err(|e| {
        SpawnError::Bootstrap(format!("Inherited descriptor {} is not open: {}", fd, e))
    })?;
    set_cloexec(borrowed, true).map_err(|e| {
        SpawnError::Bootstrap(format!("Failed to set close-on-exec on {}: {}", fd, e))
    })?;
    Ok(unsafe { PipeFd::from_raw(fd) })
}

/// A duplex channel: two independent unidirectional pipes identifying one
/// communication endpoint.
///
/// The dispatcher owns one actor whose `input` pipe is the shared
/// notification path. Every worker gets one dedicated actor: tasks flow
/// through `input`, results through `output`.
#[derive(Debug)]
pub struct Actor {
    pub input: Pipe,
    pub output: Pipe,
}

impl Actor {
    /// Create a fresh duplex channel.
    pub fn open() -> Result<Self> {
        Ok(Self {
            input: Pipe::open()?,
            output: Pipe::open()?,
        })
    }

    /// Reconstruct a duplex channel from descriptors inherited at spawn.
    ///
    /// # Safety
    /// All four descriptors must be open in this process and not owned by
    /// anything else; this is the case for descriptors listed in the channel
    /// manifest of a freshly spawned worker.
    pub unsafe fn from_fds(fds: ActorFds) -> Result<Self> {
        Ok(Self {
            input: unsafe { Pipe::from_fds(fds.input)? },
            output: unsafe { Pipe::from_fds(fds.output)? },
        })
    }

    /// Descriptor numbers for the channel manifest.
    ///
    /// Fails if any end has already been taken or closed.
    pub fn fds(&self) -> Result<ActorFds> {
        match (self.input.fds(), self.output.fds()) {
            (Some(input), Some(output)) => Ok(ActorFds { input, output }),
            _ => Err(SpawnError::Bootstrap(
                "Duplex channel is partially closed".into(),
            )),
        }
    }

    /// Close both ends of both pipes. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.input.close();
        self.output.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_pipe() -> (PipeFd, PipeFd) {
        let mut pipe = Pipe::open().expect("Failed to create pipe");
        (
            pipe.take_read_end().unwrap(),
            pipe.take_write_end().unwrap(),
        )
    }

    #[test]
    fn test_line_reader_writer_roundtrip() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line("hello").unwrap();
        writer.write_line("world\n").unwrap();
        writer.write_line("").unwrap();
        drop(writer); // Close write end to signal EOF

        assert_eq!(reader.read_line().unwrap(), Some("hello"));
        assert_eq!(reader.read_line().unwrap(), Some("world"));
        assert_eq!(reader.read_line().unwrap(), Some(""));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_pipe_ends_are_cloexec() {
        let mut pipe = Pipe::open().unwrap();
        let read_end = pipe.take_read_end().unwrap();
        let flags = fcntl(&read_end, FcntlArg::F_GETFD).unwrap();
        assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
    }

    #[test]
    fn test_actor_fds_are_distinct() {
        let actor = Actor::open().unwrap();
        let fds = actor.fds().unwrap().to_array();
        let unique: std::collections::HashSet<_> = fds.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_actor_fds_fail_after_take() {
        let mut actor = Actor::open().unwrap();
        let _reader = actor.input.take_read_end();
        assert!(actor.fds().is_err());
    }

    #[test]
    fn test_actor_double_close() {
        let mut actor = Actor::open().unwrap();
        actor.close();
        actor.close();
        assert!(actor.fds().is_err());
    }

    #[test]
    fn test_actor_from_fds_roundtrip() {
        let mut original = Actor::open().unwrap();
        let fds = original.fds().unwrap();

        // Hand the raw descriptors over as if they had been inherited.
        let raw: Vec<RawFd> = [
            original.input.take_read_end(),
            original.input.take_write_end(),
            original.output.take_read_end(),
            original.output.take_write_end(),
        ]
        .into_iter()
        .map(|fd| {
            let fd = fd.unwrap();
            let raw = fd.as_raw_fd();
            std::mem::forget(fd);
            raw
        })
        .collect();
        assert_eq!(raw, fds.to_array().to_vec());

        let mut adopted = unsafe { Actor::from_fds(fds) }.unwrap();
        let mut writer = LineWriter::new(adopted.input.take_write_end().unwrap());
        let mut reader = LineReader::new(adopted.input.take_read_end().unwrap());
        writer.write_line("ping").unwrap();
        assert_eq!(reader.read_line().unwrap(), Some("ping"));
    }

    #[test]
    fn test_adopt_rejects_negative_descriptor() {
        let fds = ActorFds {
            input: PipeFds { read: -1, write: -1 },
            output: PipeFds { read: -1, write: -1 },
        };
        let err = unsafe { Actor::from_fds(fds) }.unwrap_err();
        assert!(matches!(err, SpawnError::Bootstrap(_)));
    }
}
