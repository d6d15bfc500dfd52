//! Gofer TUN/TAP Interface
//!
//! Opens the virtual interface that terminates the tunnel and configures it
//! as a point-to-point link between the two derived tunnel addresses. The
//! forwarding loops only see the device as an async byte source/sink that
//! yields one frame per read.

use crate::config::{InterfaceKind, TunnelConfig};
use futures::TryStreamExt;
use rtnetlink::{new_connection, Handle};
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use tracing::{debug, info};
use tun::Layer;

/// Errors that can occur with TUN operations.
#[derive(Debug, Error)]
pub enum TunError {
    #[error("failed to create TUN device: {0}")]
    Create(#[from] tun::Error),

    #[error("failed to configure TUN device: {0}")]
    Configure(String),

    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
}

/// An open TUN or TAP device.
pub struct TunDevice {
    device: tun::AsyncDevice,
    name: String,
    kind: InterfaceKind,
    mtu: u16,
}

impl TunDevice {
    /// Create the device described by the tunnel configuration.
    ///
    /// An interface left over under the same name is deleted first.
    /// This requires CAP_NET_ADMIN capability (run with sudo or setcap).
    pub async fn create(config: &TunnelConfig) -> Result<Self, TunError> {
        let name = config.name();
        let mtu = config.mtu();
        let kind = config.kind();

        if interface_exists(name).await {
            info!(name, "Deleting existing interface");
            if let Err(e) = delete_interface(name).await {
                debug!(name, error = %e, "Failed to delete existing interface");
            }
        }

        let layer = match kind {
            InterfaceKind::Tun => Layer::L3,
            InterfaceKind::Tap => Layer::L2,
        };

        let mut tun_config = tun::Configuration::default();

        #[allow(deprecated)]
        tun_config.name(name).layer(layer).mtu(mtu);

        let device = tun::create_as_async(&tun_config)?;

        info!(name, kind = %kind, mtu, "Interface created");

        Ok(Self {
            device,
            name: name.to_string(),
            kind,
            mtu,
        })
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the interface kind.
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// Get the configured MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Assign the point-to-point addresses, set the MTU and bring the link up.
    pub async fn configure(&self, local: Ipv4Addr, peer: Ipv4Addr) -> Result<(), TunError> {
        configure_point_to_point(&self.name, local, peer, self.mtu).await
    }

    /// Hand over the async device for the forwarding loops.
    pub fn into_device(self) -> tun::AsyncDevice {
        self.device
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mtu", &self.mtu)
            .finish()
    }
}

/// Configure an interface as a point-to-point IPv4 link via netlink.
///
/// Equivalent to `ip addr add LOCAL peer PEER dev NAME` followed by
/// `ip link set dev NAME up mtu MTU`.
pub async fn configure_point_to_point(
    name: &str,
    local: Ipv4Addr,
    peer: Ipv4Addr,
    mtu: u16,
) -> Result<(), TunError> {
    let (connection, handle, _) = new_connection()
        .map_err(|e| TunError::Configure(format!("netlink connection failed: {}", e)))?;
    tokio::spawn(connection);

    let index = get_interface_index(&handle, name).await?;

    handle
        .address()
        .add(index, IpAddr::V4(local), 32)
        .execute()
        .await?;

    handle
        .link()
        .set(index)
        .mtu(mtu as u32)
        .execute()
        .await?;

    handle.link().set(index).up().execute().await?;

    // Host route to the far end of the link
    handle
        .route()
        .add()
        .v4()
        .destination_prefix(peer, 32)
        .output_interface(index)
        .execute()
        .await?;

    info!(name, local = %local, peer = %peer, mtu, "Interface configured");

    Ok(())
}

/// Check if a network interface already exists.
async fn interface_exists(name: &str) -> bool {
    let Ok((connection, handle, _)) = new_connection() else {
        return false;
    };
    tokio::spawn(connection);

    get_interface_index(&handle, name).await.is_ok()
}

/// Delete a network interface by name.
async fn delete_interface(name: &str) -> Result<(), TunError> {
    let (connection, handle, _) = new_connection()
        .map_err(|e| TunError::Configure(format!("netlink connection failed: {}", e)))?;
    tokio::spawn(connection);

    let index = get_interface_index(&handle, name).await?;
    handle.link().del(index).execute().await?;

    debug!(name, index, "Interface deleted");
    Ok(())
}

/// Get the interface index by name.
async fn get_interface_index(handle: &Handle, name: &str) -> Result<u32, TunError> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();

    if let Some(link) = links.try_next().await? {
        Ok(link.header.index)
    } else {
        Err(TunError::InterfaceNotFound(name.to_string()))
    }
}

// Note: device creation and netlink configuration require elevated
// privileges and are not covered by unit tests.
