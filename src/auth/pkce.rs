//! PKCE (RFC 7636) verifier/challenge generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Verifier length used for every authorization attempt.
pub const VERIFIER_LENGTH: usize = 64;

/// RFC 7636 unreserved characters.
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are rejected so every character is equally likely.
const ACCEPT_BELOW: u8 = (256 / VERIFIER_ALPHABET.len() * VERIFIER_ALPHABET.len()) as u8;

/// The OS secure random source could not be read.
#[derive(Debug, Error)]
#[error("secure random source unavailable: {0}")]
pub struct EntropyError(#[from] getrandom::Error);

/// Generate a verifier of `length` characters from the unreserved alphabet.
///
/// Only the OS CSPRNG is used. There is no fallback generator.
pub fn generate_verifier(length: usize) -> Result<String, EntropyError> {
    let mut verifier = String::with_capacity(length);
    let mut buf = [0u8; 96];

    while verifier.len() < length {
        getrandom::getrandom(&mut buf)?;
        for &byte in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if verifier.len() == length {
                break;
            }
            verifier.push(VERIFIER_ALPHABET[byte as usize % VERIFIER_ALPHABET.len()] as char);
        }
    }

    Ok(verifier)
}

/// `BASE64URL(SHA256(verifier))`, unpadded.
pub fn derive_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verifier/challenge pair for one authorization attempt. Never persisted.
#[derive(Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Result<Self, EntropyError> {
        let verifier = generate_verifier(VERIFIER_LENGTH)?;
        let challenge = derive_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }

    pub fn method(&self) -> &'static str {
        "S256"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_length_and_alphabet() {
        let verifier = generate_verifier(VERIFIER_LENGTH).unwrap();
        assert_eq!(verifier.len(), 64);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-._~".contains(c)));

        assert_eq!(generate_verifier(128).unwrap().len(), 128);
        assert_eq!(generate_verifier(0).unwrap(), "");
    }

    #[test]
    fn test_verifiers_are_unique() {
        let a = PkceChallenge::generate().unwrap();
        let b = PkceChallenge::generate().unwrap();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn test_challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            derive_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_challenge_is_deterministic_and_unpadded() {
        let pkce = PkceChallenge::generate().unwrap();
        assert_eq!(derive_challenge(&pkce.verifier), pkce.challenge);
        assert_eq!(pkce.challenge.len(), 43);
        assert!(!pkce.challenge.contains('='));
        assert!(!pkce.challenge.contains('+'));
        assert!(!pkce.challenge.contains('/'));
        assert_eq!(pkce.method(), "S256");
    }
}
