//! Tunnel Address Derivation
//!
//! Both endpoints compute the point-to-point addresses independently from
//! the same configured subnet. The subnet is always treated as a /30: the
//! first usable host belongs to the server, the second to the client.

use crate::config::Role;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Prefix length of the tunnel block.
pub const TUNNEL_PREFIX_LEN: u8 = 30;

/// Errors from tunnel address derivation.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid tunnel IP: {0}")]
    InvalidTunnelIp(String),
}

/// The two host addresses of a tunnel /30 block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TunnelAddrs {
    /// Network base + 1.
    pub server: Ipv4Addr,
    /// Network base + 2.
    pub client: Ipv4Addr,
}

impl TunnelAddrs {
    /// Derive the server/client pair from a subnet string.
    ///
    /// Accepts `a.b.c.d` or `a.b.c.d/len`. Any host bits are masked off and
    /// the prefix length, if given, does not change the /30 mask.
    pub fn derive(subnet: &str) -> Result<Self, AddressError> {
        let subnet = subnet.trim();
        let ip = match subnet.split_once('/') {
            Some(_) => subnet
                .parse::<Ipv4Net>()
                .map(|net| net.addr())
                .map_err(|_| AddressError::InvalidTunnelIp(subnet.to_string()))?,
            None => subnet
                .parse::<Ipv4Addr>()
                .map_err(|_| AddressError::InvalidTunnelIp(subnet.to_string()))?,
        };

        let network = Ipv4Net::new(ip, TUNNEL_PREFIX_LEN)
            .map_err(|_| AddressError::InvalidTunnelIp(subnet.to_string()))?
            .network();

        let base = u32::from(network);
        Ok(Self {
            server: Ipv4Addr::from(base + 1),
            client: Ipv4Addr::from(base + 2),
        })
    }

    /// Get (local, peer) addresses for an endpoint role.
    pub fn for_role(&self, role: Role) -> (Ipv4Addr, Ipv4Addr) {
        match role {
            Role::Server => (self.server, self.client),
            Role::Client => (self.client, self.server),
        }
    }
}
