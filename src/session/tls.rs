//! Interactive certificate trust.
//!
//! When the platform trust store rejects the server certificate the
//! engine's user is asked whether to proceed anyway, with a report of
//! what exactly is wrong plus the certificate fingerprint. The answer
//! is accepted iff it starts with `y`/`Y`. On rejection the report is
//! parked so the session can surface it through `get_error_string`.

use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error as TlsError, SignatureScheme};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::types::AuthCallback;

/// Report text parked for the session when a handshake is refused.
pub type TlsReportSlot = Arc<Mutex<Option<String>>>;

pub struct InteractiveVerifier {
    inner: Arc<WebPkiServerVerifier>,
    auth: Option<AuthCallback>,
    report: TlsReportSlot,
}

// rustls wants verifiers to be Debug; the auth callback is an opaque
// function object, so it stays out of the output.
impl std::fmt::Debug for InteractiveVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveVerifier")
            .field("inner", &self.inner)
            .field("has_auth_callback", &self.auth.is_some())
            .finish()
    }
}

impl InteractiveVerifier {
    pub fn new(auth: Option<AuthCallback>, report: TlsReportSlot) -> Result<Self, TlsError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TlsError::General(e.to_string()))?;
        Ok(InteractiveVerifier {
            inner,
            auth,
            report,
        })
    }

    /// Human-readable reason line for one certificate failure.
    fn failure_line(err: &TlsError) -> &'static str {
        match err {
            TlsError::InvalidCertificate(CertificateError::NotValidYet) => {
                " * The certificate is not yet valid.\n"
            }
            TlsError::InvalidCertificate(CertificateError::Expired) => {
                " * The certificate has expired.\n"
            }
            TlsError::InvalidCertificate(CertificateError::UnknownIssuer) => {
                " * The certificate is not trusted!\n"
            }
            TlsError::InvalidCertificate(CertificateError::NotValidForName) => {
                " * The hostname for which the certificate was issued does not match the hostname of the server\n"
            }
            TlsError::InvalidCertificate(CertificateError::Revoked) => {
                " * The server certificate has been revoked by the issuing authority.\n"
            }
            _ => " * The certificate chain contained a certificate other than the server cert\n",
        }
    }

    fn fingerprint(cert: &CertificateDer<'_>) -> String {
        let digest = Sha256::digest(cert.as_ref());
        digest
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn compose_report(err: &TlsError, cert: &CertificateDer<'_>) -> String {
        let mut report = String::from("There are problems with the SSL certificate:\n");
        report.push_str(Self::failure_line(err));
        report.push_str(&format!(
            "Fingerprint (SHA-256): {}\n",
            Self::fingerprint(cert)
        ));
        report
    }
}

impl ServerCertVerifier for InteractiveVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(err) => {
                let report = Self::compose_report(&err, end_entity);
                if let Some(cb) = &self.auth {
                    debug!("asking the engine to confirm an untrusted certificate");
                    let prompt = format!(
                        "{}Do you want to accept the certificate anyway?\nAnswer yes to do so and take the risk: ",
                        report
                    );
                    let answer = cb(&prompt, true);
                    if answer.starts_with('y') || answer.starts_with('Y') {
                        return Ok(ServerCertVerified::assertion());
                    }
                }
                warn!("server certificate rejected");
                *self.report.lock().unwrap_or_else(|p| p.into_inner()) = Some(report);
                Err(err)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
