//! Connection Information

use std::net::SocketAddr;

use rustls::ProtocolVersion;

/// Addresses of a connected socket, captured when its endpoint is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    /// The local address of the socket.
    pub local_addr: SocketAddr,

    /// The remote address of the socket.
    pub remote_addr: SocketAddr,
}

impl ConnectionInfo {
    /// Connection information for a pair of addresses.
    pub fn new(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            remote_addr,
        }
    }
}

/// Information about a TLS connection.
///
/// Only available once the handshake has completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConnectionInfo {
    /// The negotiated TLS version.
    pub protocol_version: Option<ProtocolVersion>,

    /// The application layer protocol negotiated for this connection.
    pub alpn: Option<String>,
}

impl TlsConnectionInfo {
    pub(crate) fn client(client_info: &rustls::ClientConnection) -> Self {
        let alpn = client_info
            .alpn_protocol()
            .and_then(|s| std::str::from_utf8(s).ok())
            .map(String::from);

        Self {
            protocol_version: client_info.protocol_version(),
            alpn,
        }
    }
}
