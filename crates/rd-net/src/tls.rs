//! rustls client connector backed by the embedded WebPKI roots.

use crate::transport::BoxedIoStream;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use rustls::ClientConfig;
use rustls::ClientConnection;
use rustls::RootCertStore;
use rustls::StreamOwned;
use rustls::pki_types::ServerName;
use std::net::TcpStream;
use std::sync::Arc;

/// Upgrades TCP streams to TLS. Cheap to clone; the client config is shared.
#[derive(Debug, Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
}

impl TlsConnector {
    pub fn new() -> TrackerResult<Self> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let roots = webpki_root_store()?;

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|error| {
                TrackerError::new(
                    "net.tls.config_versions_invalid",
                    format!("failed to configure TLS protocol versions: {error}"),
                )
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn connect(&self, mut stream: TcpStream, server_name: &str) -> TrackerResult<BoxedIoStream> {
        let name = ServerName::try_from(server_name.to_owned()).map_err(|error| {
            TrackerError::new(
                "net.tls.server_name_invalid",
                format!("invalid TLS server name `{server_name}`: {error}"),
            )
        })?;

        let mut connection = ClientConnection::new(Arc::clone(&self.config), name).map_err(
            |error| {
                TrackerError::new(
                    "net.tls.connection_init_failed",
                    format!("failed to initialize TLS connection for `{server_name}`: {error}"),
                )
            },
        )?;

        connection.complete_io(&mut stream).map_err(|error| {
            TrackerError::new(
                "net.tls.handshake_failed",
                format!("TLS handshake failed for `{server_name}`: {error}"),
            )
        })?;

        Ok(Box::new(StreamOwned::new(connection, stream)))
    }
}

fn webpki_root_store() -> TrackerResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if roots.is_empty() {
        return Err(TrackerError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}
