//! Local interface and source address discovery
//!
//! Resolved once at startup into an immutable [`LocalAddr`] that every
//! session's dialer shares.

use anyhow::{Result, anyhow, bail};
use std::net::Ipv4Addr;

/// Interface names a network interface and its kernel index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
}

/// LocalAddr describes where outbound connections originate from: an
/// optional source IPv4 address and an optional egress interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalAddr {
    ip: Option<Ipv4Addr>,
    iface: Option<Interface>,
}

/// LocalAddr implementation block
impl LocalAddr {
    /// unspecified lets the OS pick source address and route
    pub fn unspecified() -> Self {
        Self::default()
    }

    /// for_interface resolves the named interface and its first IPv4 address
    pub fn for_interface(name: &str) -> Result<Self> {
        let index = interface_index(name)?;

        // An interface without IPv4 still restricts egress
        let ip = ipv4_addresses()?
            .into_iter()
            .find(|addr| addr.name == name)
            .map(|addr| addr.ip);

        Ok(Self {
            ip,
            iface: Some(Interface {
                name: name.to_string(),
                index,
            }),
        })
    }

    /// discover returns the first non-loopback IPv4 address of this host
    pub fn discover() -> Option<Ipv4Addr> {
        ipv4_addresses()
            .ok()?
            .into_iter()
            .find(|addr| !addr.loopback && !addr.ip.is_loopback())
            .map(|addr| addr.ip)
    }

    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    pub fn iface(&self) -> Option<&Interface> {
        self.iface.as_ref()
    }
}

/// One IPv4 address assigned to an interface
#[derive(Debug)]
struct IfAddr {
    name: String,
    ip: Ipv4Addr,
    loopback: bool,
}

#[cfg(unix)]
fn interface_index(name: &str) -> Result<u32> {
    use std::ffi::CString;

    let cname = CString::new(name)
        .map_err(|e| anyhow!("[ERR] invalid interface name {name:?}: {e}"))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        bail!(
            "[ERR] unknown interface {name}: {}",
            std::io::Error::last_os_error()
        );
    }

    Ok(index)
}

#[cfg(not(unix))]
fn interface_index(name: &str) -> Result<u32> {
    bail!("[ERR] binding to interface {name} is not supported on this platform")
}

/// ipv4_addresses walks getifaddrs(3) and collects every IPv4 address
#[cfg(unix)]
fn ipv4_addresses() -> Result<Vec<IfAddr>> {
    use std::ffi::CStr;
    use std::ptr;

    let mut head: *mut libc::ifaddrs = ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(anyhow!(
            "[ERR] getifaddrs failed: {}",
            std::io::Error::last_os_error()
        ));
    }

    let mut addrs = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // Safety: cursor walks the list returned by getifaddrs until freeifaddrs
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_name.is_null() {
            continue;
        }

        let family = unsafe { (*entry.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }

        // Safety: AF_INET entries carry a sockaddr_in
        let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();
        let loopback = entry.ifa_flags & (libc::IFF_LOOPBACK as libc::c_uint) != 0;

        addrs.push(IfAddr { name, ip, loopback });
    }

    unsafe { libc::freeifaddrs(head) };

    Ok(addrs)
}

#[cfg(not(unix))]
fn ipv4_addresses() -> Result<Vec<IfAddr>> {
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_is_empty() {
        let local = LocalAddr::unspecified();
        assert_eq!(local.ip(), None);
        assert!(local.iface().is_none());
    }

    #[test]
    fn unknown_interface_is_an_error() {
        assert!(LocalAddr::for_interface("nosuchif0").is_err());
        assert!(LocalAddr::for_interface("bad\0name").is_err());
    }

    #[test]
    fn discovered_address_is_not_loopback() {
        if let Some(ip) = LocalAddr::discover() {
            assert!(!ip.is_loopback());
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn loopback_interface_resolves() {
        let local = LocalAddr::for_interface("lo").unwrap();
        assert_eq!(local.ip(), Some(Ipv4Addr::LOCALHOST));

        let iface = local.iface().unwrap();
        assert_eq!(iface.name, "lo");
        assert!(iface.index > 0);
    }
}
