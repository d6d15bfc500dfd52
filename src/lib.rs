//! Gofer: encrypted point-to-point tunnel
//!
//! Carries frames between two TUN/TAP interfaces over UDP. Every packet is
//! sealed with a pre-shared key, can be sent several times for loss
//! resilience, and is delivered once.

pub mod address;
pub mod cipher;
pub mod config;
pub mod dedup;
pub mod session;
pub mod transport;
pub mod tun;

// Re-export cipher types
pub use cipher::{generate_key_hex, Cipher, CipherError, Iv, Signature, ENVELOPE_OVERHEAD};

// Re-export config types
pub use config::{
    Config, ConfigError, InterfaceKind, Protocol, Role, TransportConfig, TunnelConfig,
};

// Re-export address types
pub use address::{AddressError, TunnelAddrs};

// Re-export duplicate suppression
pub use dedup::{DuplicateRegister, DUPLICATE_WINDOW};

// Re-export transport types
pub use transport::{Transport, TransportError};

// Re-export TUN types
pub use tun::{TunDevice, TunError};

// Re-export session types
pub use session::{
    classify, ErrorLevel, Session, SessionError, SessionState, SessionStats, StatsSnapshot,
};
