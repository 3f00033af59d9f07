use std::io;
use std::net::SocketAddr;

use socket2::SockRef;

use crate::iface::Interface;

/// bind_interface sets SO_BINDTODEVICE, which covers both address families
pub(super) fn bind_interface(
    socket: &SockRef<'_>,
    iface: &Interface,
    _target: SocketAddr,
) -> io::Result<()> {
    socket.bind_device(Some(iface.name.as_bytes()))
}
