use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;

use socket2::SockRef;

use crate::iface::Interface;

const IP_BOUND_IF: libc::c_int = 25; // bsd/netinet/in.h
const IPV6_BOUND_IF: libc::c_int = 125; // bsd/netinet6/in6.h

/// bind_interface sets IP_BOUND_IF or IPV6_BOUND_IF depending on the family
/// of the address being dialed
pub(super) fn bind_interface(
    socket: &SockRef<'_>,
    iface: &Interface,
    target: SocketAddr,
) -> io::Result<()> {
    let index: libc::c_uint = iface.index;

    let (level, name) = match target {
        SocketAddr::V4(..) => (libc::IPPROTO_IP, IP_BOUND_IF),
        SocketAddr::V6(..) => (libc::IPPROTO_IPV6, IPV6_BOUND_IF),
    };

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &index as *const _ as *const libc::c_void,
            mem::size_of_val(&index) as libc::socklen_t,
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
