use crate::error::SessionError;
use crate::protocol::AddressType;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// TargetAddr is the destination a client asked to be connected to.
/// Domain names are kept unresolved until dial time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

/// TargetAddr implementation block
impl TargetAddr {
    /// host returns the dotted-decimal, IPv6 or domain form of the address
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// resolve turns the target into the socket addresses to try, in order.
    /// Lookup failures are reported as unreachable hosts
    pub async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        match self {
            TargetAddr::Ip(addr) => Ok(vec![*addr]),
            TargetAddr::Domain(domain, port) => {
                let addrs: Vec<SocketAddr> = tokio::net::lookup_host((domain.as_str(), *port))
                    .await
                    .map_err(|e| {
                        io::Error::new(
                            io::ErrorKind::HostUnreachable,
                            format!("failed to resolve host '{domain}': {e}"),
                        )
                    })?
                    .collect();

                if addrs.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::HostUnreachable,
                        format!("no IP address found for '{domain}'"),
                    ));
                }

                Ok(addrs)
            }
        }
    }

    /// encode appends the ATYP, DST.ADDR and DST.PORT fields for this target
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                out.push(AddressType::IPv4 as u8);
                out.extend_from_slice(&addr.ip().octets());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                out.push(AddressType::IPv6 as u8);
                out.extend_from_slice(&addr.ip().octets());
            }
            TargetAddr::Domain(domain, _) => {
                // Length prefix is a single octet
                let bytes = &domain.as_bytes()[..domain.len().min(u8::MAX as usize)];
                out.push(AddressType::DomainName as u8);
                out.push(bytes.len() as u8);
                out.extend_from_slice(bytes);
            }
        }
        out.extend_from_slice(&self.port().to_be_bytes());
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // SocketAddr already brackets IPv6 hosts
            TargetAddr::Ip(addr) => write!(f, "{addr}"),
            TargetAddr::Domain(domain, port) if domain.contains(':') => {
                write!(f, "[{domain}]:{port}")
            }
            TargetAddr::Domain(domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}

/// parse_address_from_stream reads DST.ADDR and DST.PORT for an already
/// known address type. `buf` is scratch space of at least 256 bytes
pub async fn parse_address_from_stream<S>(
    stream: &mut S,
    addr_type: AddressType,
    buf: &mut [u8],
) -> Result<TargetAddr, SessionError>
where
    S: AsyncRead + Unpin,
{
    // Match type and extract address or domain name
    let target = match addr_type {
        AddressType::IPv4 => {
            stream.read_exact(&mut buf[..4]).await?;
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[..4]);
            let ip = IpAddr::V4(Ipv4Addr::from(octets));

            TargetAddr::Ip(SocketAddr::new(ip, read_port(stream, buf).await?))
        }
        AddressType::DomainName => {
            // First octet in DomainName contains the number of
            // octets to follow
            stream.read_exact(&mut buf[..1]).await?;
            let len = buf[0] as usize;

            stream.read_exact(&mut buf[..len]).await?;
            let domain = String::from_utf8(buf[..len].to_vec())?;

            TargetAddr::Domain(domain, read_port(stream, buf).await?)
        }
        AddressType::IPv6 => {
            stream.read_exact(&mut buf[..16]).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let ip = IpAddr::V6(Ipv6Addr::from(octets));

            TargetAddr::Ip(SocketAddr::new(ip, read_port(stream, buf).await?))
        }
    };

    Ok(target)
}

/// read_port reads DST.PORT -> BigEndian (network order)
async fn read_port<S>(stream: &mut S, buf: &mut [u8]) -> io::Result<u16>
where
    S: AsyncRead + Unpin,
{
    stream.read_exact(&mut buf[..2]).await?;
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(addr_type: AddressType, mut wire: &[u8]) -> Result<TargetAddr, SessionError> {
        let mut buf = [0u8; 256];
        parse_address_from_stream(&mut wire, addr_type, &mut buf).await
    }

    #[tokio::test]
    async fn ipv4_round_trip() {
        let target = TargetAddr::Ip("192.0.2.1:8080".parse().unwrap());
        let mut wire = Vec::new();
        target.encode(&mut wire);
        assert_eq!(wire, [0x01, 192, 0, 2, 1, 0x1F, 0x90]);

        let parsed = parse(AddressType::IPv4, &wire[1..]).await.unwrap();
        assert_eq!(parsed.host(), "192.0.2.1");
        assert_eq!(parsed.port(), 8080);
        assert_eq!(parsed, target);
    }

    #[tokio::test]
    async fn ipv6_is_canonical() {
        let mut wire = vec![0x20, 0x01, 0x0d, 0xb8];
        wire.extend_from_slice(&[0; 11]);
        wire.push(0x01);
        wire.extend_from_slice(&443u16.to_be_bytes());

        let parsed = parse(AddressType::IPv6, &wire).await.unwrap();
        assert_eq!(parsed.host(), "2001:db8::1");
        assert_eq!(parsed.to_string(), "[2001:db8::1]:443");
    }

    #[tokio::test]
    async fn domain_is_length_prefixed() {
        let mut wire = vec![11];
        wire.extend_from_slice(b"example.com");
        wire.extend_from_slice(&80u16.to_be_bytes());

        let parsed = parse(AddressType::DomainName, &wire).await.unwrap();
        assert_eq!(parsed, TargetAddr::Domain("example.com".to_string(), 80));
        assert_eq!(parsed.to_string(), "example.com:80");
    }

    #[tokio::test]
    async fn invalid_utf8_domain() {
        let wire = [2, 0xff, 0xfe, 0, 80];
        let err = parse(AddressType::DomainName, &wire).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidDomain(_)));
    }

    #[tokio::test]
    async fn truncated_address_is_io_error() {
        let wire = [127, 0, 0];
        let err = parse(AddressType::IPv4, &wire).await.unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[tokio::test]
    async fn resolve_literal_without_lookup() {
        let target = TargetAddr::Ip("127.0.0.1:9".parse().unwrap());
        assert_eq!(target.resolve().await.unwrap(), vec!["127.0.0.1:9".parse().unwrap()]);
    }

    #[tokio::test]
    async fn resolve_failure_is_host_unreachable() {
        let target = TargetAddr::Domain("does-not-exist.invalid".to_string(), 80);
        let err = target.resolve().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::HostUnreachable);
    }
}
