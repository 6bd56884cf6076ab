//! Listening-port selection.
//!
//! A port is drawn at random from a fixed range and bound; collisions with
//! ports already in use are retried on a fresh random port up to a fixed
//! number of attempts. The random source is owned by the caller and seeded
//! once.

use rand::Rng;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::SocketError;

pub const DEFAULT_PORT_RANGE_START: u16 = 3000;
pub const DEFAULT_PORT_RANGE_SIZE: u16 = 5000;
pub const DEFAULT_BIND_ATTEMPTS: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortAllocator {
    range_start: u16,
    range_size: u16,
    max_attempts: u32,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            range_start: DEFAULT_PORT_RANGE_START,
            range_size: DEFAULT_PORT_RANGE_SIZE,
            max_attempts: DEFAULT_BIND_ATTEMPTS,
        }
    }
}

impl PortAllocator {
    /// Candidates are drawn from `[range_start, range_start + range_size)`.
    pub fn new(range_start: u16, range_size: u16, max_attempts: u32) -> Result<Self, SocketError> {
        if range_size == 0 {
            return Err(SocketError::InvalidArgument("port range is empty".into()));
        }
        if max_attempts == 0 {
            return Err(SocketError::InvalidArgument(
                "bind attempts must be at least 1".into(),
            ));
        }
        if range_start == 0 || u32::from(range_start) + u32::from(range_size) > 65536 {
            return Err(SocketError::InvalidArgument(format!(
                "port range {}+{} is outside 1..=65535",
                range_start, range_size
            )));
        }
        Ok(Self {
            range_start,
            range_size,
            max_attempts,
        })
    }

    pub fn range_start(&self) -> u16 {
        self.range_start
    }

    /// Exclusive upper bound of the range.
    pub fn range_end(&self) -> u32 {
        u32::from(self.range_start) + u32::from(self.range_size)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> u16 {
        self.range_start + rng.random_range(0..self.range_size)
    }

    /// Bind a random port from the range with `bind`.
    ///
    /// `AddrInUse` failures are retried on a new random port; any other
    /// bind error is returned at once as `InvalidArgument`. After
    /// `max_attempts` collisions the result is `PortExhausted`.
    pub fn acquire<R, L, F>(&self, rng: &mut R, mut bind: F) -> Result<(u16, L), SocketError>
    where
        R: Rng + ?Sized,
        F: FnMut(u16) -> io::Result<L>,
    {
        for attempt in 1..=self.max_attempts {
            let port = self.pick(rng);
            match bind(port) {
                Ok(listener) => {
                    debug!(port, attempt, "Bound console socket port");
                    return Ok((port, listener));
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!(port, attempt, "Port in use, retrying");
                }
                Err(e) => {
                    return Err(SocketError::InvalidArgument(format!(
                        "failed to bind port {}: {}",
                        port, e
                    )));
                }
            }
        }

        warn!(
            attempts = self.max_attempts,
            "No free port in {}..{}",
            self.range_start,
            self.range_end()
        );
        Err(SocketError::PortExhausted {
            attempts: self.max_attempts,
            range_start: self.range_start,
            range_end: self.range_end(),
        })
    }
}

/// Host capability check deciding between a dual-stack and an IPv4 listener.
pub trait StackProbe: Send + Sync {
    fn supports_dual_stack(&self) -> bool;
}

/// Looks for the kernel's IPv6 interface table (`/proc/net/if_inet6`).
#[derive(Clone, Debug)]
pub struct ProcNetProbe {
    path: PathBuf,
}

impl Default for ProcNetProbe {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/net/if_inet6"),
        }
    }
}

impl ProcNetProbe {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StackProbe for ProcNetProbe {
    fn supports_dual_stack(&self) -> bool {
        self.path.exists()
    }
}

/// Tries to bind an ephemeral port on the IPv6 wildcard address.
#[derive(Clone, Copy, Debug, Default)]
pub struct BindProbe;

impl StackProbe for BindProbe {
    fn supports_dual_stack(&self) -> bool {
        std::net::TcpListener::bind((Ipv6Addr::UNSPECIFIED, 0)).is_ok()
    }
}

/// Fixed answer, for hosts where the capability is known up front.
#[derive(Clone, Copy, Debug)]
pub struct StaticProbe(pub bool);

impl StackProbe for StaticProbe {
    fn supports_dual_stack(&self) -> bool {
        self.0
    }
}

/// Platform default probe.
pub fn default_probe() -> Box<dyn StackProbe> {
    if cfg!(target_os = "linux") {
        Box::new(ProcNetProbe::default())
    } else {
        Box::new(BindProbe)
    }
}

/// Wildcard address to listen on for the probed stack.
pub fn wildcard_addr(probe: &dyn StackProbe) -> IpAddr {
    if probe.supports_dual_stack() {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
}
