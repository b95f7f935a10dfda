//! Trust store construction for the broker's TLS handshake
//!
//! The client trusts exactly one certificate authority: the one bundled with
//! it. No platform roots are merged in. The trust configuration is rebuilt on
//! every connect attempt, so replacing the CA file takes effect on the next
//! reconnect.

use rumqttc::tokio_rustls::rustls::pki_types::CertificateDer;
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failures while turning the CA asset into a TLS client configuration
#[derive(Debug, Error)]
pub enum TrustBuildError {
    #[error("CA certificate asset unreadable: {path}")]
    AssetUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CA certificate could not be parsed: {0}")]
    CertificateParse(String),
    #[error("Trust store initialization failed: {0}")]
    TrustStoreInit(String),
}

/// Immutable TLS client configuration anchored on a single CA
#[derive(Clone)]
pub struct TrustConfiguration {
    client_config: Arc<ClientConfig>,
}

impl std::fmt::Debug for TrustConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustConfiguration").finish_non_exhaustive()
    }
}

impl TrustConfiguration {
    /// The rustls client configuration handed to the transport
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Transport setting for rumqttc
    pub fn into_transport(self) -> RumqttcTransport {
        RumqttcTransport::tls_with_config(TlsConfiguration::Rustls(self.client_config))
    }
}

/// Read the CA asset from disk
pub fn load_ca_asset(path: &Path) -> Result<Vec<u8>, TrustBuildError> {
    std::fs::read(path).map_err(|source| TrustBuildError::AssetUnreadable {
        path: path.display().to_string(),
        source,
    })
}

/// Read the CA asset and build its trust configuration
pub fn trust_config_from_file(path: &Path) -> Result<TrustConfiguration, TrustBuildError> {
    let asset = load_ca_asset(path)?;
    build_trust_config(&asset)
}

/// Build a trust configuration containing only the certificate in `asset`
///
/// The asset may be PEM (exactly one `CERTIFICATE` block) or raw DER.
pub fn build_trust_config(asset: &[u8]) -> Result<TrustConfiguration, TrustBuildError> {
    let certificate = parse_single_certificate(asset)?;

    let mut roots = RootCertStore::empty();
    roots
        .add(certificate)
        .map_err(|e| TrustBuildError::TrustStoreInit(e.to_string()))?;

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    debug!(target: "chat_tls", "Built TLS trust configuration with a single CA anchor");

    Ok(TrustConfiguration {
        client_config: Arc::new(client_config),
    })
}

/// Extract exactly one X.509 certificate from a PEM or DER asset
pub fn parse_single_certificate(asset: &[u8]) -> Result<CertificateDer<'static>, TrustBuildError> {
    if asset.is_empty() {
        return Err(TrustBuildError::CertificateParse(
            "asset is empty".to_string(),
        ));
    }

    if !looks_like_pem(asset) {
        // DER certificates are a single ASN.1 SEQUENCE
        if asset[0] != 0x30 {
            return Err(TrustBuildError::CertificateParse(
                "asset is neither PEM nor DER".to_string(),
            ));
        }
        return Ok(CertificateDer::from(asset.to_vec()));
    }

    let mut reader = BufReader::new(asset);
    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TrustBuildError::CertificateParse(e.to_string()))?;

    let count = certificates.len();
    let mut certificates = certificates.into_iter();
    match (certificates.next(), count) {
        (Some(certificate), 1) => Ok(certificate),
        (None, _) => Err(TrustBuildError::CertificateParse(
            "no CERTIFICATE block found".to_string(),
        )),
        (Some(_), n) => Err(TrustBuildError::CertificateParse(format!(
            "expected exactly one certificate, found {n}"
        ))),
    }
}

fn looks_like_pem(asset: &[u8]) -> bool {
    let trimmed = asset
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &asset[start..])
        .unwrap_or_default();
    trimmed.starts_with(b"-----BEGIN")
}
