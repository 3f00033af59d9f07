//! Server configuration record

use crate::protocol::{DEFAULT_PORT, Network};
use anyhow::{Result, anyhow, bail};
use std::time::Duration;

/// Config holds every setting the listener hands down to its sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub ipv6: bool,
    pub network: Network,
    pub timeout: Duration,
    pub verbose: bool,
    pub iface: Option<String>,
    pub reuse_addr: bool,
    pub no_delay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ipv6: false,
            network: Network::Tcp,
            timeout: Duration::from_secs(1),
            verbose: false,
            iface: None,
            reuse_addr: false,
            no_delay: false,
        }
    }
}

/// Config implementation block
impl Config {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// with_network accepts the network family by name, see [`Network::from_name`]
    pub fn with_network(mut self, name: &str) -> Self {
        self.network = Network::from_name(name);
        self
    }

    /// with_timeout sets the dial timeout, zero disables it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// with_iface binds outbound connections to the named interface
    pub fn with_iface(mut self, iface: impl Into<String>) -> Self {
        self.iface = Some(iface.into());
        self
    }

    pub fn enable_verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn enable_reuse_addr(mut self) -> Self {
        self.reuse_addr = true;
        self
    }

    pub fn enable_no_delay(mut self) -> Self {
        self.no_delay = true;
        self
    }

    /// enable_ipv6 makes the listener bind the IPv6 wildcard address
    pub fn enable_ipv6(mut self) -> Self {
        self.ipv6 = true;
        self
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// parse_duration reads Go style durations such as `500us`, `1.5s`, `1m30s`
/// or `2h`. A bare number is taken as seconds
pub fn parse_duration(value: &str) -> Result<Duration> {
    let input = value.trim();
    if input.is_empty() {
        bail!("[ERR] empty duration");
    }

    if input.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = input
            .parse()
            .map_err(|e| anyhow!("[ERR] invalid duration {input:?}: {e}"))?;
        return Ok(Duration::from_secs(secs));
    }

    let overflow = || anyhow!("[ERR] duration {input:?} is too large");
    let mut total: u128 = 0;
    let mut rest = input;

    // Each component is a decimal number followed by a unit
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);

        let split = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(split);

        let scale = unit_nanos(unit)
            .ok_or_else(|| anyhow!("[ERR] unknown duration unit {unit:?} in {input:?}"))?;
        let nanos = scaled_nanos(number, scale)
            .ok_or_else(|| anyhow!("[ERR] invalid duration {input:?}"))?;

        total = total.checked_add(nanos).ok_or_else(overflow)?;
        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| overflow())?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// scaled_nanos converts `number` of a unit worth `scale` nanoseconds.
/// Fraction digits finer than a nanosecond are dropped
fn scaled_nanos(number: &str, scale: u128) -> Option<u128> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(scale)?;

    let mut place = scale;
    for digit in frac.bytes() {
        place /= 10;
        if place == 0 {
            break;
        }
        nanos = nanos.checked_add(u128::from(digit - b'0') * place)?;
    }

    Some(nanos)
}
