//! Socket options applied to outbound sockets before they connect
//!
//! Interface binding and address reuse only take effect when set on a socket
//! that has not connected yet, so [`Control::apply`] runs between socket
//! creation and `connect`. Option failures are logged and the dial carries on.

use std::io;
use std::net::SocketAddr;

use cfg_if::cfg_if;
use socket2::SockRef;
use tokio::net::TcpSocket;
use tracing::warn;

use crate::iface::Interface;

cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        use self::linux as sys;
    } else if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        mod macos;
        use self::macos as sys;
    } else {
        mod other;
        use self::other as sys;
    }
}

/// ControlOptions collects the socket options for one dial
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlOptions {
    iface: Option<Interface>,
    reuse_addr: bool,
    no_delay: bool,
}

impl ControlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// bind_to_interface restricts egress to `iface`
    pub fn bind_to_interface(mut self, iface: Interface) -> Self {
        self.iface = Some(iface);
        self
    }

    /// enable_reuse_addr sets SO_REUSEADDR and SO_REUSEPORT
    pub fn enable_reuse_addr(mut self) -> Self {
        self.reuse_addr = true;
        self
    }

    /// enable_no_delay sets TCP_NODELAY
    pub fn enable_no_delay(mut self) -> Self {
        self.no_delay = true;
        self
    }

    /// build freezes the options into a pre-connect hook
    pub fn build(self) -> Control {
        Control { opts: self }
    }
}

/// Control is the pre-connect hook built from [`ControlOptions`]
#[derive(Debug, Clone, Default)]
pub struct Control {
    opts: ControlOptions,
}

impl Control {
    /// apply sets the configured options on an unconnected socket that is
    /// about to dial `target`. The interface binding matches the family of
    /// `target`
    pub fn apply(&self, socket: &TcpSocket, target: SocketAddr) {
        let sock = SockRef::from(socket);

        if let Some(ref iface) = self.opts.iface {
            if let Err(e) = sys::bind_interface(&sock, iface, target) {
                warn!("bind to interface {} failed: {}", iface.name, e);
            }
        }

        if self.opts.reuse_addr {
            check("SO_REUSEADDR", sock.set_reuse_address(true));
            #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
            check("SO_REUSEPORT", sock.set_reuse_port(true));
        }

        if self.opts.no_delay {
            check("TCP_NODELAY", sock.set_nodelay(true));
        }
    }
}

fn check(option: &str, result: io::Result<()>) {
    if let Err(e) = result {
        warn!("set {} failed: {}", option, e);
    }
}
