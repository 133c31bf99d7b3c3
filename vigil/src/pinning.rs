//! Certificate pinning for the monitor's TLS connections.
//!
//! A server certificate is trusted when default WebPKI chain validation
//! succeeds, or when the presented leaf certificate's SHA-256 fingerprint
//! (computed over its DER encoding) equals the pinned certificate's. The
//! second rule deliberately admits self-signed certificates for the one
//! endpoint being watched.
use anyhow::{Context, Result, anyhow};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::{self, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime, pem::PemObject},
};
use sha2::{Digest, Sha256};
use std::{fmt, path::Path, sync::Arc};

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// SHA-256 digest of a DER-encoded certificate.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// The certificate trusted by exact fingerprint match.
///
/// Loaded once at startup and only ever compared against.
#[derive(Debug, Clone)]
pub struct PinnedCertificate {
    der: CertificateDer<'static>,
    fingerprint: Fingerprint,
}

impl PinnedCertificate {
    /// Reads a PEM or DER certificate from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read certificate: {}", path.display()))?;
        Self::from_bytes(&bytes)
            .with_context(|| format!("Failed to parse certificate: {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let der = if bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER) {
            CertificateDer::from_pem_slice(bytes)
                .map_err(|e| anyhow!("invalid PEM certificate: {:?}", e))?
        } else {
            CertificateDer::from(bytes.to_vec())
        };
        webpki::EndEntityCert::try_from(&der)
            .map_err(|e| anyhow!("not an X.509 certificate: {}", e))?;

        let fingerprint = Fingerprint::of(&der);
        Ok(Self { der, fingerprint })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }
}

/// Trust decision for a presented leaf certificate.
///
/// `chain_error` is the outcome of default chain validation; `None` means it
/// passed. A failed chain is still trusted when the leaf matches the pin.
pub fn is_trusted(
    presented: &CertificateDer<'_>,
    chain_error: Option<&TlsError>,
    pinned: &Fingerprint,
) -> bool {
    chain_error.is_none() || Fingerprint::of(presented) == *pinned
}

/// rustls verifier applying [`is_trusted`] on top of WebPKI validation.
///
/// Handshake signatures are always checked against the presented leaf key;
/// the pin only replaces chain-of-trust.
#[derive(Debug)]
pub struct PinningVerifier {
    default: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    pinned: Fingerprint,
}

impl PinningVerifier {
    pub fn new(pinned: Fingerprint, provider: Arc<CryptoProvider>) -> Result<Self> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let default =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                .build()
                .context("Failed to build WebPKI verifier")?;

        Ok(Self {
            default,
            provider,
            pinned,
        })
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let chain_error = self
            .default
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .err();

        if is_trusted(end_entity, chain_error.as_ref(), &self.pinned) {
            if let Some(e) = &chain_error {
                tracing::debug!(
                    "{:?}: chain rejected ({}), accepted by pinned fingerprint",
                    server_name,
                    e
                );
            }
            return Ok(ServerCertVerified::assertion());
        }

        tracing::warn!(
            "{:?}: certificate {} does not match pinned {}",
            server_name,
            Fingerprint::of(end_entity),
            self.pinned
        );
        Err(chain_error.unwrap_or(TlsError::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        )))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client TLS configuration whose every handshake goes through [`PinningVerifier`].
pub fn client_config(pinned: &PinnedCertificate) -> Result<ClientConfig> {
    let provider = Arc::new(crypto::ring::default_provider());
    let verifier = PinningVerifier::new(pinned.fingerprint(), provider.clone())?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}
