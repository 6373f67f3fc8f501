use std::fmt;
use std::net::Ipv4Addr;

/// A service identified behind an open port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Detection {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub protocol: String,
}

impl Detection {
    pub fn new(addr: Ipv4Addr, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            addr,
            port,
            protocol: protocol.into(),
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.addr, self.port, self.protocol)
    }
}
