//! Secure session configuration.
//!
//! Produces the immutable `rustls::ClientConfig` every connection attempt
//! uses: client certificate auth, the GCM/CHACHA cipher suites appropriate
//! for the gateway protocol, and ALPN offering exactly one protocol
//! identifier. The dialer rejects any connection where the peer negotiated
//! something else. No network IO happens here.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::{CipherSuite, ClientConfig, RootCertStore};

use crate::credentials::ClientIdentity;
use crate::error::CredentialError;

/// The one application protocol this client speaks.
pub const ALPN_PROTOCOL: &[u8] = b"pushwire/1";

/// Cipher suites offered to the gateway. Forward-secret AEAD suites only.
const APPROVED_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

/// Build the client TLS configuration for a loaded identity.
///
/// `extra_roots` extends the webpki trust anchors; deployments fronted by
/// a private CA (and the test harness) add their root here.
pub(crate) fn build_client_config(
    identity: ClientIdentity,
    extra_roots: Vec<CertificateDer<'static>>,
) -> Result<Arc<ClientConfig>, CredentialError> {
    let provider = approved_provider();

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for cert in extra_roots {
        roots
            .add(cert)
            .map_err(|e| CredentialError::InvalidContainer(format!("bad root certificate: {e}")))?;
    }

    let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| CredentialError::InvalidContainer(format!("TLS configuration: {e}")))?
        .with_root_certificates(roots)
        .with_client_auth_cert(identity.cert_chain, identity.private_key)
        .map_err(|e| CredentialError::InvalidContainer(format!("client key rejected: {e}")))?;

    config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    Ok(Arc::new(config))
}

/// Ring provider restricted to the approved cipher suites.
fn approved_provider() -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    provider
        .cipher_suites
        .retain(|suite| APPROVED_CIPHER_SUITES.contains(&suite.suite()));
    provider
}
