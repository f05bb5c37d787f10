//! TUN device backed by `/dev/net/tun`
//!
//! Reads wait in `poll(2)` on both the device and an `eventfd`; signalling
//! the eventfd from [`TunnelDevice::close`] wakes a pending read, which then
//! reports [`TunnelError::Closed`].

use crate::error::{PlatformError, Result};
use crate::linux::routes::{CommandRunner, RoutePlan};
use focusdns_core::tunnel::{TunnelDevice, TunnelResult};
use focusdns_core::{TunnelConfig, TunnelError};
use parking_lot::Mutex;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Upper bound on one `poll(2)` wait, in milliseconds
const POLL_TIMEOUT_MS: libc::c_int = 500;

/// An open TUN interface with its routing installed
pub struct LinuxTunDevice {
    name: String,
    fd: RawFd,
    // Owns `fd`; dropped only with the device
    _device: Mutex<tun::platform::Device>,
    wake: OwnedFd,
    closed: AtomicBool,
    routes: Mutex<Option<RoutePlan>>,
    runner: Arc<dyn CommandRunner>,
}

impl LinuxTunDevice {
    /// Create the interface and install its routes
    pub(crate) fn open(
        config: &TunnelConfig,
        runner: Arc<dyn CommandRunner>,
        uid: u32,
    ) -> Result<Self> {
        let mut tun_config = tun::Configuration::default();
        tun_config
            .name(&config.name)
            .address(config.address)
            .netmask(prefix_to_netmask(config.prefix_len))
            .mtu(i32::from(config.mtu))
            .up();
        tun_config.platform(|platform| {
            platform.packet_information(false);
        });

        let device = tun::create(&tun_config).map_err(map_tun_error)?;
        let fd = device.as_raw_fd();
        let wake = new_eventfd()?;

        let plan = RoutePlan::new(config, uid);
        plan.apply(runner.as_ref())?;

        info!(
            interface = %config.name,
            address = %config.address,
            mtu = config.mtu,
            "TUN device created"
        );

        Ok(Self {
            name: config.name.clone(),
            fd,
            _device: Mutex::new(device),
            wake,
            closed: AtomicBool::new(false),
            routes: Mutex::new(Some(plan)),
            runner,
        })
    }

    fn signal_wake(&self) {
        let one: u64 = 1;
        // SAFETY: writes 8 bytes from a live u64 to an eventfd we own
        let n = unsafe {
            libc::write(
                self.wake.as_raw_fd(),
                std::ptr::addr_of!(one).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            debug!(error = %io::Error::last_os_error(), "Failed to signal tunnel wake-up");
        }
    }
}

impl TunnelDevice for LinuxTunDevice {
    fn read_packet(&self, buf: &mut [u8]) -> TunnelResult<Option<usize>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }

        let mut fds = [
            libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        // SAFETY: `fds` is a valid array of two pollfd structs
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), 2, POLL_TIMEOUT_MS) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(TunnelError::Io(err));
        }
        if fds[1].revents != 0 || self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }
        if ready == 0 {
            return Ok(None);
        }
        if fds[0].revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(TunnelError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("poll reported {:#x} on {}", fds[0].revents, self.name),
            )));
        }

        // SAFETY: `buf` is valid for `buf.len()` writable bytes
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(TunnelError::Io(err)),
            };
        }
        let n = n.unsigned_abs();
        trace!(len = n, "Read packet from TUN");
        Ok(Some(n))
    }

    fn write_packet(&self, packet: &[u8]) -> TunnelResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }
        // SAFETY: `packet` is valid for `packet.len()` readable bytes
        let n = unsafe { libc::write(self.fd, packet.as_ptr().cast(), packet.len()) };
        if n < 0 {
            return Err(TunnelError::Io(io::Error::last_os_error()));
        }
        if n.unsigned_abs() != packet.len() {
            return Err(TunnelError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {n} of {} bytes", packet.len()),
            )));
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.signal_wake();
        if let Some(plan) = self.routes.lock().take() {
            plan.revert(self.runner.as_ref());
        }
        info!(interface = %self.name, "TUN device closed");
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LinuxTunDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Netmask for a prefix length, saturating at /32
pub(crate) fn prefix_to_netmask(prefix_len: u8) -> Ipv4Addr {
    let bits = u32::from(prefix_len.min(32));
    let mask = u32::MAX.checked_shl(32 - bits).unwrap_or(0);
    Ipv4Addr::from(mask)
}

fn new_eventfd() -> Result<OwnedFd> {
    // SAFETY: plain syscall; the result is checked before use
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
    if fd < 0 {
        return Err(PlatformError::Io(io::Error::last_os_error()));
    }
    // SAFETY: `fd` is a freshly created descriptor owned by nobody else
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn map_tun_error(err: tun::Error) -> PlatformError {
    match err {
        tun::Error::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            PlatformError::PermissionDenied(format!("creating TUN device requires CAP_NET_ADMIN: {e}"))
        }
        tun::Error::Io(e) => PlatformError::Io(e),
        other => PlatformError::DeviceCreate(other.to_string()),
    }
}
