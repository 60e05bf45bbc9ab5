use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

/// A network interface carrying raw IPv4 frames.
pub trait Nic {
    /// Reads one frame into `buf`, blocking until one is available.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Sends one frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<usize>;

    /// Waits until a frame can be read or `timeout` elapses, `None` waiting
    /// indefinitely. Returns `true` if a frame is ready.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<bool>;
}

impl Nic for tun_tap::Iface {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        tun_tap::Iface::recv(self, buf)
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        tun_tap::Iface::send(self, frame)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut fds = [PollFd::new(borrow_fd(self), PollFlags::POLLIN)];
        let timeout = match timeout {
            // round up so a pending deadline is not polled in a busy loop
            Some(t) => PollTimeout::from(
                u16::try_from(t.as_millis().saturating_add(1)).unwrap_or(u16::MAX),
            ),
            None => PollTimeout::NONE,
        };
        match poll(&mut fds, timeout) {
            Ok(n) => Ok(n > 0),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// `tun_tap::Iface` exposes only its raw descriptor.
fn borrow_fd(iface: &tun_tap::Iface) -> BorrowedFd<'_> {
    // SAFETY: the descriptor is owned by `iface`, which the returned borrow
    // cannot outlive
    unsafe { BorrowedFd::borrow_raw(iface.as_raw_fd()) }
}
