//! AF_PACKET raw socket capture for Linux

use std::ffi::CString;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::{io, mem, thread};

use libc::{
    AF_PACKET, EFD_CLOEXEC, EFD_NONBLOCK, ETH_P_ALL, IFF_PROMISC, POLLERR, POLLHUP, POLLIN,
    POLLNVAL, SIOCGIFFLAGS, SIOCSIFFLAGS, SOCK_CLOEXEC, SOCK_RAW, c_short, c_void, pollfd,
    sockaddr_ll,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::CaptureStop;
use crate::config::CaptureConfig;
use crate::types::{InterfaceKind, RawFrame};
use crate::{LinkwatchError, Result};

/// RAII wrapper for an AF_PACKET socket bound to one interface.
///
/// Closing the socket also clears the promiscuous flag if this socket was the
/// one that set it.
struct PacketSocket {
    fd: RawFd,
    interface: String,
    restore_promiscuous: bool,
}

impl PacketSocket {
    /// Create a raw socket for all protocols and bind it to `interface`.
    fn open(interface: &str) -> Result<Self> {
        let index = interface_index(interface)?;
        let protocol = (ETH_P_ALL as u16).to_be();

        // SAFETY: plain socket() call, return value checked below
        let fd = unsafe { libc::socket(AF_PACKET, SOCK_RAW | SOCK_CLOEXEC, i32::from(protocol)) };
        if fd < 0 {
            return Err(LinkwatchError::socket_failed(interface, "socket"));
        }
        let socket = Self { fd, interface: interface.to_string(), restore_promiscuous: false };

        // SAFETY: sockaddr_ll is a C struct for which all-zero is a valid value
        let mut addr: sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = AF_PACKET as u16;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = index as i32;

        // SAFETY: fd is a valid socket, addr is initialized and its size is passed
        let ret = unsafe {
            libc::bind(
                socket.fd,
                &addr as *const sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            return Err(LinkwatchError::socket_failed(interface, "bind"));
        }

        debug!(interface, index, fd = socket.fd, "Packet socket bound");
        Ok(socket)
    }

    /// Set the promiscuous bit in the interface flag word.
    fn enable_promiscuous(&mut self) -> Result<()> {
        let flags = self
            .read_flags()
            .map_err(|source| self.socket_error("SIOCGIFFLAGS", source))?;

        if flags & IFF_PROMISC as c_short != 0 {
            debug!(interface = %self.interface, "Interface already promiscuous");
            return Ok(());
        }

        self.write_flags(flags | IFF_PROMISC as c_short)
            .map_err(|source| self.socket_error("SIOCSIFFLAGS", source))?;
        self.restore_promiscuous = true;

        info!(interface = %self.interface, "Promiscuous mode enabled");
        Ok(())
    }

    fn read_flags(&self) -> io::Result<c_short> {
        let mut ifr = self.ifreq();
        // SAFETY: fd is valid and ifr is a properly initialized ifreq
        let ret = unsafe { libc::ioctl(self.fd, SIOCGIFFLAGS as _, &mut ifr as *mut libc::ifreq) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: SIOCGIFFLAGS fills the flags member of the union
        Ok(unsafe { ifr.ifr_ifru.ifru_flags })
    }

    fn write_flags(&self, flags: c_short) -> io::Result<()> {
        let mut ifr = self.ifreq();
        ifr.ifr_ifru.ifru_flags = flags;
        // SAFETY: fd is valid and ifr carries the name and flags
        let ret = unsafe { libc::ioctl(self.fd, SIOCSIFFLAGS as _, &mut ifr as *mut libc::ifreq) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ifreq(&self) -> libc::ifreq {
        // SAFETY: ifreq is a C struct for which all-zero is a valid value
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        // Leave room for the terminating NUL
        for (dst, src) in
            ifr.ifr_name.iter_mut().zip(self.interface.as_bytes()).take(libc::IFNAMSIZ - 1)
        {
            *dst = *src as libc::c_char;
        }
        ifr
    }

    fn socket_error(&self, operation: &'static str, source: io::Error) -> LinkwatchError {
        LinkwatchError::Socket { interface: self.interface.clone(), operation, source }
    }

    /// Receive one frame into `buf`, retrying on EINTR.
    ///
    /// Returns the frame's length on the wire, which exceeds `buf.len()` when
    /// the frame did not fit.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: fd is valid, buf is writable for buf.len() bytes
            let n = unsafe {
                libc::recv(self.fd, buf.as_mut_ptr() as *mut c_void, buf.len(), libc::MSG_TRUNC)
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Drop for PacketSocket {
    fn drop(&mut self) {
        if self.restore_promiscuous {
            let restored = self
                .read_flags()
                .and_then(|flags| self.write_flags(flags & !(IFF_PROMISC as c_short)));
            match restored {
                Ok(()) => info!(interface = %self.interface, "Promiscuous mode restored"),
                Err(e) => warn!(
                    interface = %self.interface,
                    error = %e,
                    "Failed to clear promiscuous mode"
                ),
            }
        }

        // SAFETY: fd is owned by this wrapper and not used after drop
        unsafe {
            libc::close(self.fd);
        }
        trace!(fd = self.fd, "Packet socket closed");
    }
}

/// Resolve an interface name to its kernel index.
fn interface_index(interface: &str) -> Result<u32> {
    let name = CString::new(interface)
        .map_err(|_| LinkwatchError::interface_not_found(interface))?;
    // SAFETY: name is a valid NUL-terminated string
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(LinkwatchError::interface_not_found(interface));
    }
    Ok(index)
}

/// RAII wrapper for the eventfd used to wake a reader blocked in `poll`.
#[derive(Debug)]
pub struct ShutdownEventFd(RawFd);

impl ShutdownEventFd {
    pub fn new() -> io::Result<Self> {
        // SAFETY: eventfd() is safe to call, we check for errors
        let fd = unsafe { libc::eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(fd))
    }

    fn as_raw_fd(&self) -> RawFd {
        self.0
    }

    /// Make the eventfd readable. Safe to call repeatedly.
    pub fn signal(&self) -> io::Result<()> {
        let val: u64 = 1;
        // SAFETY: self.0 is valid, val is an initialized u64
        let ret = unsafe {
            libc::write(self.0, &val as *const u64 as *const c_void, mem::size_of::<u64>())
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Whether the eventfd is readable, without consuming the count.
    pub fn is_signalled(&self) -> bool {
        let mut fds = [pollfd { fd: self.0, events: POLLIN, revents: 0 }];
        // SAFETY: fds is a valid array of one pollfd
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, 0) };
        ret > 0 && fds[0].revents & POLLIN != 0
    }
}

impl Drop for ShutdownEventFd {
    fn drop(&mut self) {
        // SAFETY: self.0 is a valid file descriptor that we own
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Open `interface` and start its reader thread.
///
/// All fallible setup happens on the calling thread so that open failures are
/// returned to the caller rather than surfacing as an empty sequence.
pub(super) fn spawn_reader(
    interface: &str,
    kind: InterfaceKind,
    config: &CaptureConfig,
    stop: &CaptureStop,
    frames: mpsc::Sender<RawFrame>,
) -> Result<()> {
    let mut socket = PacketSocket::open(interface)?;
    socket.enable_promiscuous()?;

    let wake = Arc::new(
        ShutdownEventFd::new().map_err(|source| socket.socket_error("eventfd", source))?,
    );
    if !stop.attach_wake(Arc::clone(&wake)) {
        debug!(interface, "Stop handle already has a reader; relying on poll timeout");
    }

    let reader = Reader {
        socket,
        wake,
        frames,
        cancel: stop.token().clone(),
        kind,
        buffer_size: config.read_buffer_size,
        poll_timeout_ms: i32::try_from(config.poll_timeout_ms).unwrap_or(i32::MAX),
    };

    info!(interface, %kind, "Capture socket opened");

    thread::Builder::new()
        .name(format!("linkwatch-{kind}"))
        .spawn(move || reader.run())
        .map_err(|source| LinkwatchError::Socket {
            interface: interface.to_string(),
            operation: "spawn reader",
            source,
        })?;

    Ok(())
}

/// State owned by the dedicated reader thread.
struct Reader {
    socket: PacketSocket,
    wake: Arc<ShutdownEventFd>,
    frames: mpsc::Sender<RawFrame>,
    cancel: CancellationToken,
    kind: InterfaceKind,
    buffer_size: usize,
    poll_timeout_ms: i32,
}

impl Reader {
    fn run(self) {
        let interface = self.socket.interface.clone();
        let mut buf = vec![0u8; self.buffer_size];
        let mut frame_count = 0u64;
        let mut truncated_count = 0u64;

        info!(interface = %interface, "Capture reader started");

        loop {
            if self.cancel.is_cancelled() {
                debug!(interface = %interface, "Capture stop observed");
                break;
            }
            if self.frames.is_closed() {
                debug!(interface = %interface, "Frame consumer dropped");
                break;
            }

            let mut fds = [
                pollfd { fd: self.socket.fd, events: POLLIN, revents: 0 },
                pollfd { fd: self.wake.as_raw_fd(), events: POLLIN, revents: 0 },
            ];

            // SAFETY: fds is a valid array of two pollfds
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as _, self.poll_timeout_ms) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(interface = %interface, error = %err, "poll() failed, ending capture");
                break;
            }
            if ret == 0 {
                continue;
            }

            if fds[1].revents != 0 {
                debug!(interface = %interface, "Capture reader woken for shutdown");
                break;
            }
            if fds[0].revents & (POLLERR | POLLHUP | POLLNVAL) != 0 {
                warn!(
                    interface = %interface,
                    revents = fds[0].revents,
                    "Socket error detected via poll(), ending capture"
                );
                break;
            }
            if fds[0].revents & POLLIN == 0 {
                continue;
            }

            let wire_len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    warn!(interface = %interface, error = %e, "recv() failed, ending capture");
                    break;
                }
            };

            let (len, truncated) = captured_len(wire_len, buf.len());
            if truncated {
                truncated_count += 1;
                if truncated_count == 1 {
                    warn!(
                        interface = %interface,
                        wire_len,
                        read_buffer_size = buf.len(),
                        "Frame larger than the read buffer was truncated; raise capture.read_buffer_size"
                    );
                }
            }

            // Copy out of the reusable buffer before handing off
            let frame = RawFrame::new(buf[..len].to_vec(), chrono::Local::now(), self.kind);
            frame_count += 1;
            trace!(interface = %interface, len, frame_count, "Frame received");

            if !self.push(frame) {
                break;
            }
        }

        info!(
            interface = %interface,
            frames = frame_count,
            truncated = truncated_count,
            "Capture reader stopped"
        );
    }

    /// Push a frame, blocking while the queue is full.
    ///
    /// Returns `false` if the stop signal fired or the consumer went away
    /// while waiting.
    fn push(&self, frame: RawFrame) -> bool {
        futures::executor::block_on(async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = self.frames.send(frame) => sent.is_ok(),
            }
        })
    }
}

/// Bytes actually held in a `capacity`-byte buffer for a frame of
/// `wire_len` bytes, and whether the frame was cut short.
fn captured_len(wire_len: usize, capacity: usize) -> (usize, bool) {
    (wire_len.min(capacity), wire_len > capacity)
}
