use std::io;
use std::net::SocketAddr;

use socket2::SockRef;

use crate::iface::Interface;

pub(super) fn bind_interface(
    _socket: &SockRef<'_>,
    iface: &Interface,
    _target: SocketAddr,
) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("binding to interface {} is not supported on this platform", iface.name),
    ))
}
