use std::net::{SocketAddr, TcpListener};
use tracing::debug;

/// Result of probing the backend port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Available,
    Occupied,
}

/// Check whether a port can be bound right now.
/// Best effort: another process may grab the port right after we release it;
/// the health probe is what actually decides.
pub fn check_port(port: u16) -> PortStatus {
    // Check both 0.0.0.0 and 127.0.0.1; the backend may bind either
    let addrs = [
        SocketAddr::from(([0, 0, 0, 0], port)),
        SocketAddr::from(([127, 0, 0, 1], port)),
    ];

    for addr in addrs {
        match TcpListener::bind(addr) {
            // The listener is dropped at the end of the arm, freeing the port
            Ok(_) => {}
            Err(e) => {
                debug!("Port {} not bindable on {}: {}", port, addr, e);
                return PortStatus::Occupied;
            }
        }
    }

    PortStatus::Available
}
