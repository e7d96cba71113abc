// src/channel/timeout.rs

//! The socket-level channel. Reads are non-blocking; writes block for at
//! most a configured duration before the channel is declared dead.

use super::{ByteChannel, ReadStatus, closed_error};
use crate::core::LdapError;
use crate::core::state::LdapStatistics;
use bytes::BytesMut;
use mio::net::TcpStream;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Used when the configured maximum blocked-write time is zero.
pub const DEFAULT_MAX_BLOCKED_WRITE_TIME: Duration = Duration::from_secs(300);

const READ_CHUNK: usize = 8 * 1024;

/// Wraps a non-blocking `mio` socket.
pub struct TimeoutWriteChannel {
    stream: TcpStream,
    write_lock: Mutex<()>,
    max_blocked_write_time: Duration,
    open: AtomicBool,
    stats: Option<Arc<LdapStatistics>>,
}

impl TimeoutWriteChannel {
    pub fn new(
        stream: TcpStream,
        max_blocked_write_time: Duration,
        stats: Option<Arc<LdapStatistics>>,
    ) -> Self {
        let max_blocked_write_time = if max_blocked_write_time.is_zero() {
            DEFAULT_MAX_BLOCKED_WRITE_TIME
        } else {
            max_blocked_write_time
        };
        Self {
            stream,
            write_lock: Mutex::new(()),
            max_blocked_write_time,
            open: AtomicBool::new(true),
            stats,
        }
    }

    pub fn max_blocked_write_time(&self) -> Duration {
        self.max_blocked_write_time
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    #[cfg(unix)]
    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        std::os::fd::AsRawFd::as_raw_fd(&self.stream)
    }

    /// Writes all of `data`, failing with `WriteTimedOut` if the socket stays
    /// unwritable past `deadline`. A timeout closes the channel.
    pub fn write_with_deadline(&self, data: &[u8], deadline: Instant) -> Result<usize, LdapError> {
        let _guard = self.write_lock.lock();
        if !self.is_open() {
            return Err(closed_error("client socket"));
        }

        let mut written = 0;
        while written < data.len() {
            match (&self.stream).write(&data[written..]) {
                Ok(0) => {
                    self.close();
                    return Err(closed_error("client socket"));
                }
                Ok(n) => {
                    written += n;
                    if let Some(stats) = &self.stats {
                        stats.update_bytes_written(n);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline || !self.wait_writable(deadline - now)? {
                        debug!(
                            "Write to {:?} blocked longer than {:?}; closing the channel.",
                            self.peer_addr(),
                            self.max_blocked_write_time
                        );
                        self.close();
                        return Err(LdapError::WriteTimedOut {
                            timeout_ms: self.max_blocked_write_time.as_millis() as u64,
                        });
                    }
                }
                Err(e) => {
                    self.close();
                    return Err(e.into());
                }
            }
        }
        Ok(written)
    }

    /// Waits until the socket reports writable. Returns false on timeout.
    #[cfg(unix)]
    fn wait_writable(&self, timeout: Duration) -> Result<bool, LdapError> {
        let mut pfd = libc::pollfd {
            fd: self.raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        let millis = timeout.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;
        loop {
            // SAFETY: `pfd` is a valid, initialized pollfd and the count is 1.
            let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            return Ok(rc > 0);
        }
    }

    /// Poll-loop fallback for platforms without `poll(2)`.
    #[cfg(not(unix))]
    fn wait_writable(&self, timeout: Duration) -> Result<bool, LdapError> {
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(true)
    }
}

impl ByteChannel for TimeoutWriteChannel {
    fn read(&self, buf: &mut BytesMut) -> Result<ReadStatus, LdapError> {
        if !self.is_open() {
            return Err(closed_error("client socket"));
        }
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        let mut eof = false;
        loop {
            match (&self.stream).read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(stats) = &self.stats
            && total > 0
        {
            stats.update_bytes_read(total);
        }
        Ok(match (total, eof) {
            (0, true) => ReadStatus::Eof,
            (0, false) => ReadStatus::WouldBlock,
            (n, _) => ReadStatus::Data(n),
        })
    }

    fn write(&self, data: &[u8]) -> Result<usize, LdapError> {
        self.write_with_deadline(data, Instant::now() + self.max_blocked_write_time)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}
