//! Initiator security credential for B2C requests.
//!
//! Daraja expects the initiator password encrypted with the public key from
//! the certificate Safaricom publishes per environment (RSA, PKCS#1 v1.5
//! padding), then base64 encoded.

use crate::payments::error::{PaymentError, PaymentResult};
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use std::path::Path;
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::Certificate;

/// Loads the provider certificate (PEM or DER) from disk and encrypts `initiator_password`.
pub fn security_credential_from_file(
    cert_path: &Path,
    initiator_password: &str,
) -> PaymentResult<String> {
    let bytes = std::fs::read(cert_path).map_err(|e| PaymentError::CredentialError {
        message: format!("failed to read certificate {}: {}", cert_path.display(), e),
    })?;
    security_credential(&bytes, initiator_password)
}

pub fn security_credential(cert_bytes: &[u8], initiator_password: &str) -> PaymentResult<String> {
    if initiator_password.is_empty() {
        return Err(PaymentError::CredentialError {
            message: "initiator password is empty".to_string(),
        });
    }

    let public_key = public_key_from_certificate(cert_bytes)?;
    let mut rng = rand::thread_rng();
    let encrypted = public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, initiator_password.as_bytes())
        .map_err(|e| PaymentError::CredentialError {
            message: format!("failed to encrypt initiator password: {}", e),
        })?;

    Ok(base64.encode(encrypted))
}

fn public_key_from_certificate(cert_bytes: &[u8]) -> PaymentResult<RsaPublicKey> {
    let is_pem = cert_bytes
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take(10)
        .copied()
        .collect::<Vec<u8>>()
        .starts_with(b"-----BEGIN");

    let certificate = if is_pem {
        Certificate::from_pem(cert_bytes)
    } else {
        Certificate::from_der(cert_bytes)
    }
    .map_err(|e| PaymentError::CredentialError {
        message: format!("invalid provider certificate: {}", e),
    })?;

    let spki_der = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| PaymentError::CredentialError {
            message: format!("invalid certificate public key: {}", e),
        })?;

    RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| PaymentError::CredentialError {
        message: format!("certificate does not carry an RSA public key: {}", e),
    })
}
