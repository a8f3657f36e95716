//! Message-preserving local socket (`AF_UNIX` / `SOCK_SEQPACKET`).
//!
//! Each `recv` returns exactly one message written by the camera; an empty
//! read means the peer closed the connection.

use anyhow::{anyhow, Context, Result};
use libc::{c_int, c_void, sockaddr, sockaddr_un, socklen_t};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::MessageSource;

const LISTEN_BACKLOG: c_int = 1;

fn new_socket() -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(anyhow!(io::Error::last_os_error())).context("socket(AF_UNIX, SOCK_SEQPACKET) failed");
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn socket_addr(path: &Path) -> Result<(sockaddr_un, socklen_t)> {
    let bytes = path.as_os_str().as_bytes();
    let mut addr: sockaddr_un = unsafe { std::mem::zeroed() };
    if bytes.is_empty() || bytes.len() >= addr.sun_path.len() {
        return Err(anyhow!("invalid socket path length: {}", path.display()));
    }
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    let len = std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
    Ok((addr, len as socklen_t))
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::debug!("removed stale socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!(e)).with_context(|| format!("failed to remove stale socket {}", path.display())),
    }
}

pub struct SeqPacketListener {
    fd: OwnedFd,
    path: PathBuf,
}

impl SeqPacketListener {
    /// Bind and listen at `path`, replacing a leftover socket file.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        remove_stale(path)?;
        let fd = new_socket()?;
        let (addr, len) = socket_addr(path)?;

        let rc = unsafe { libc::bind(fd.as_raw_fd(), &addr as *const sockaddr_un as *const sockaddr, len) };
        if rc != 0 {
            return Err(anyhow!(io::Error::last_os_error()))
                .with_context(|| format!("bind {} failed", path.display()));
        }
        let rc = unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) };
        if rc != 0 {
            return Err(anyhow!(io::Error::last_os_error()))
                .with_context(|| format!("listen on {} failed", path.display()));
        }
        Ok(Self {
            fd,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until a peer connects.
    pub fn accept(&self) -> Result<SeqPacketConnection> {
        loop {
            let fd = unsafe {
                libc::accept4(
                    self.fd.as_raw_fd(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                return Ok(SeqPacketConnection {
                    fd: unsafe { OwnedFd::from_raw_fd(fd) },
                });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(anyhow!(err)).context("accept failed");
            }
        }
    }

    /// Wait up to `timeout` for a peer. `None` when nobody connected in time.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<SeqPacketConnection>> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(anyhow!(err)).context("poll on listener failed");
        }
        if rc == 0 {
            return Ok(None);
        }
        self.accept().map(Some)
    }
}

impl Drop for SeqPacketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct SeqPacketConnection {
    fd: OwnedFd,
}

impl SeqPacketConnection {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fd = new_socket()?;
        let (addr, len) = socket_addr(path)?;
        let rc = unsafe { libc::connect(fd.as_raw_fd(), &addr as *const sockaddr_un as *const sockaddr, len) };
        if rc != 0 {
            return Err(anyhow!(io::Error::last_os_error()))
                .with_context(|| format!("connect to {} failed", path.display()));
        }
        Ok(Self { fd })
    }

    /// Bound blocking receives so the caller can check for shutdown.
    /// Expired receives fail with `WouldBlock`.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(Duration::ZERO);
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const c_void,
                std::mem::size_of::<libc::timeval>() as socklen_t,
            )
        };
        if rc != 0 {
            return Err(anyhow!(io::Error::last_os_error())).context("setsockopt(SO_RCVTIMEO) failed");
        }
        Ok(())
    }

    /// Send one whole message.
    pub fn send_message(&mut self, message: &[u8]) -> Result<()> {
        loop {
            let rc = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    message.as_ptr() as *const c_void,
                    message.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if rc >= 0 {
                if rc as usize != message.len() {
                    return Err(anyhow!("short send: {} of {} bytes", rc, message.len()));
                }
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(anyhow!(err)).context("send failed");
            }
        }
    }
}

impl MessageSource for SeqPacketConnection {
    fn recv_message(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let rc = unsafe { libc::recv(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}
