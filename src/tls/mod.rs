//! TLS support for `wss` connections.
//!
//! A [`TlsConfiguration`] produces one [`TlsEngine`] per connection attempt.
//! The engine is consumed by a [`TlsConnection`], which wraps the raw endpoint
//! and exposes the plaintext side as a [`DecryptedEndpoint`].

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;

mod connection;
mod engine;
mod stream;

pub use self::connection::{DecryptedEndpoint, TlsConnection};
pub use self::engine::TlsEngine;
pub use self::stream::ClientTlsStream;

/// Client TLS configuration, shared by every secure connection attempt.
#[derive(Debug, Clone)]
pub struct TlsConfiguration {
    config: Arc<ClientConfig>,
}

impl TlsConfiguration {
    /// Wrap a rustls client configuration.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    /// A configuration trusting the platform's root certificates.
    ///
    /// Certificates which fail to load or parse are skipped.
    #[cfg(feature = "native-roots")]
    pub fn native_roots() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            tracing::warn!(%error, "failed to load native certificate");
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "loaded native root certificates");

        let mut config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols.push(b"http/1.1".to_vec());
        Self::new(Arc::new(config))
    }

    /// The rustls configuration.
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Build a client engine for the connected `peer`, verifying the server
    /// certificate against `server_name`.
    ///
    /// No handshake I/O happens until the engine is wrapped around an
    /// endpoint and that endpoint is read from or written to.
    pub fn new_engine(&self, server_name: ServerName<'static>, peer: SocketAddr) -> TlsEngine {
        TlsEngine::new(self.config.clone(), server_name, peer)
    }
}

impl From<ClientConfig> for TlsConfiguration {
    fn from(config: ClientConfig) -> Self {
        Self::new(Arc::new(config))
    }
}

impl From<Arc<ClientConfig>> for TlsConfiguration {
    fn from(config: Arc<ClientConfig>) -> Self {
        Self::new(config)
    }
}
