//! TLS client identity loading.
//!
//! The gateway authenticates clients with a certificate + private key.
//! Deployments usually hold these in a passphrase-protected PKCS#12
//! container; plain PEM material is accepted too. Besides the key
//! material, the loader extracts the `UID` attributes from each
//! certificate subject - these become the default topics used to fill in
//! notifications submitted without one (first extracted identity wins).

use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::CredentialError;

/// Subject attribute carrying a default topic identity.
const UID_OID: &str = "0.9.2342.19200300.100.1.1";

/// A usable TLS client identity plus the identity strings extracted from
/// its certificates.
pub struct ClientIdentity {
    pub(crate) cert_chain: Vec<CertificateDer<'static>>,
    pub(crate) private_key: PrivateKeyDer<'static>,
    identities: Vec<String>,
}

impl ClientIdentity {
    /// Load from a PKCS#12 container file.
    pub fn from_pkcs12_file(
        path: impl AsRef<Path>,
        passphrase: &str,
    ) -> Result<Self, CredentialError> {
        let bytes = std::fs::read(path).map_err(|e| CredentialError::InvalidContainer(e.to_string()))?;
        Self::from_pkcs12_der(&bytes, passphrase)
    }

    /// Load from PKCS#12 container bytes.
    pub fn from_pkcs12_der(der: &[u8], passphrase: &str) -> Result<Self, CredentialError> {
        let pfx = p12::PFX::parse(der).map_err(|e| {
            CredentialError::InvalidContainer(format!("PKCS#12 parse failed: {:?}", e))
        })?;

        if !pfx.verify_mac(passphrase) {
            return Err(CredentialError::InvalidContainer(
                "MAC verification failed (wrong passphrase?)".to_string(),
            ));
        }

        let keys = pfx.key_bags(passphrase).map_err(|e| {
            CredentialError::InvalidContainer(format!("PKCS#12 key bags unreadable: {:?}", e))
        })?;
        let key = keys
            .into_iter()
            .next()
            .ok_or(CredentialError::NoPrivateKeyEntry)?;

        let x509_certs = pfx.cert_x509_bags(passphrase).map_err(|e| {
            CredentialError::InvalidContainer(format!("PKCS#12 cert bags unreadable: {:?}", e))
        })?;
        if x509_certs.is_empty() {
            let all_certs = pfx.cert_bags(passphrase).map_err(|e| {
                CredentialError::InvalidContainer(format!("PKCS#12 cert bags unreadable: {:?}", e))
            })?;
            if all_certs.is_empty() {
                return Err(CredentialError::InvalidContainer(
                    "container holds no certificates".to_string(),
                ));
            }
            return Err(CredentialError::UnexpectedCertificateType);
        }

        let cert_chain: Vec<CertificateDer<'static>> =
            x509_certs.into_iter().map(CertificateDer::from).collect();
        let identities = extract_identities(&cert_chain);

        Ok(Self {
            cert_chain,
            private_key: PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key)),
            identities,
        })
    }

    /// Load from PEM-encoded certificate and private key material.
    ///
    /// Passphrase-protected credentials travel as PKCS#12 containers; PEM
    /// input is expected unencrypted.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CredentialError> {
        let cert_chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CredentialError::InvalidContainer(e.to_string()))?;
        if cert_chain.is_empty() {
            return Err(CredentialError::UnexpectedCertificateType);
        }

        let private_key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| CredentialError::InvalidContainer(e.to_string()))?
            .ok_or(CredentialError::NoPrivateKeyEntry)?;

        let identities = extract_identities(&cert_chain);
        Ok(Self {
            cert_chain,
            private_key,
            identities,
        })
    }

    /// Assemble from already-loaded parts.
    pub fn from_parts(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
        identities: Vec<String>,
    ) -> Self {
        Self {
            cert_chain,
            private_key,
            identities,
        }
    }

    /// Default topic identities extracted from the certificate subjects,
    /// in extraction order.
    pub fn identities(&self) -> &[String] {
        &self.identities
    }
}

/// Collect the `UID` subject attribute values across the chain.
///
/// Certificates that fail to parse are skipped: identity extraction is a
/// convenience, not a validation step.
fn extract_identities(certs: &[CertificateDer<'static>]) -> Vec<String> {
    use x509_parser::prelude::*;

    let mut identities = Vec::new();
    for der in certs {
        let Ok((_, cert)) = X509Certificate::from_der(der.as_ref()) else {
            continue;
        };
        for attribute in cert.subject().iter_attributes() {
            if attribute.attr_type().to_id_string() == UID_OID {
                if let Ok(value) = attribute.as_str() {
                    identities.push(value.to_string());
                }
            }
        }
    }
    identities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkcs12_garbage_is_invalid_container() {
        let result = ClientIdentity::from_pkcs12_der(b"definitely not asn1", "pass");
        assert!(matches!(result, Err(CredentialError::InvalidContainer(_))));
    }

    #[test]
    fn test_pem_without_key_entry() {
        // A certificate where the key should be yields NoPrivateKeyEntry.
        let cert_pem = b"";
        let result = ClientIdentity::from_pem(cert_pem, cert_pem);
        assert!(matches!(
            result,
            Err(CredentialError::UnexpectedCertificateType) | Err(CredentialError::NoPrivateKeyEntry)
        ));
    }

    #[test]
    fn test_missing_file_is_invalid_container() {
        let result = ClientIdentity::from_pkcs12_file("/does/not/exist.p12", "pass");
        assert!(matches!(result, Err(CredentialError::InvalidContainer(_))));
    }

    #[test]
    fn test_from_parts_carries_identities() {
        let identity = ClientIdentity::from_parts(
            Vec::new(),
            PrivateKeyDer::from(PrivatePkcs8KeyDer::from(vec![0u8; 8])),
            vec!["com.example.app".to_string(), "com.example.other".to_string()],
        );
        assert_eq!(identity.identities()[0], "com.example.app");
        assert_eq!(identity.identities().len(), 2);
    }
}
