//! # Cipher Suites
//!
//! Per-connection key material and the encryptor/decryptor pair a completed key
//! exchange leaves behind.
//!
//! Two suites are available and both ends must agree on one:
//!
//! - [`CipherSuite::Rsa`] encrypts each message directly with the peer's RSA
//!   public key (PKCS#1 v1.5). A message can carry at most
//!   `modulus_bytes - 11` bytes of plaintext; anything longer is refused with
//!   `ProtocolError::PayloadTooLarge` before it reaches the socket.
//! - [`CipherSuite::X25519`] uses the exchanged keys only to agree on two
//!   directional session keys, then seals each message with XChaCha20-Poly1305.
//!   There is no plaintext ceiling beyond the frame limit.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::Crypto;
use rand_core::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};
use zeroize::Zeroize;

/// Bytes of PKCS#1 v1.5 padding added to every RSA plaintext block
pub const PKCS1_OVERHEAD: usize = 11;

/// Length of an exported X25519 public key
pub const X25519_KEY_LEN: usize = 32;

const KDF_DOMAIN: &[u8] = b"chatwire session v1";
const INITIATOR_TO_RESPONDER: &[u8] = b"initiator->responder";
const RESPONDER_TO_INITIATOR: &[u8] = b"responder->initiator";

/// Cipher suite negotiated out of band through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherSuite {
    /// Direct RSA encryption of every message, capacity bounded by the modulus
    #[default]
    Rsa,
    /// X25519 key agreement, XChaCha20-Poly1305 per message
    X25519,
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherSuite::Rsa => f.write_str("rsa"),
            CipherSuite::X25519 => f.write_str("x25519"),
        }
    }
}

impl FromStr for CipherSuite {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsa" => Ok(CipherSuite::Rsa),
            "x25519" => Ok(CipherSuite::X25519),
            other => Err(ProtocolError::ConfigError(format!(
                "Unknown cipher suite: {other} (expected 'rsa' or 'x25519')"
            ))),
        }
    }
}

/// Which side of the key exchange a party plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connecting side; receives the peer key first
    Initiator,
    /// Accepting side; sends its key first
    Responder,
}

/// Freshly generated key pair, scoped to one connection
pub enum KeyPair {
    Rsa {
        private: RsaPrivateKey,
        public: RsaPublicKey,
    },
    X25519 {
        secret: EphemeralSecret,
        public: X25519Public,
    },
}

impl KeyPair {
    /// Generate a key pair for `suite`. `rsa_bits` is only used by the RSA suite.
    pub fn generate(suite: CipherSuite, rsa_bits: usize) -> Result<Self> {
        match suite {
            CipherSuite::Rsa => {
                let private = RsaPrivateKey::new(&mut OsRng, rsa_bits).map_err(|e| {
                    ProtocolError::HandshakeError(format!("{}: {e}", constants::ERR_KEY_GENERATION))
                })?;
                let public = RsaPublicKey::from(&private);
                Ok(KeyPair::Rsa { private, public })
            }
            CipherSuite::X25519 => {
                let secret = EphemeralSecret::random_from_rng(OsRng);
                let public = X25519Public::from(&secret);
                Ok(KeyPair::X25519 { secret, public })
            }
        }
    }

    /// Generate on the blocking pool; RSA prime search would otherwise stall a runtime worker
    pub async fn generate_async(suite: CipherSuite, rsa_bits: usize) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::generate(suite, rsa_bits))
            .await
            .map_err(|e| {
                ProtocolError::HandshakeError(format!("{}: {e}", constants::ERR_KEY_GENERATION))
            })?
    }

    pub fn suite(&self) -> CipherSuite {
        match self {
            KeyPair::Rsa { .. } => CipherSuite::Rsa,
            KeyPair::X25519 { .. } => CipherSuite::X25519,
        }
    }

    /// Public key in its wire form: PKCS#1 PEM for RSA, 32 raw bytes for X25519
    pub fn export_public(&self) -> Result<Vec<u8>> {
        match self {
            KeyPair::Rsa { public, .. } => public
                .to_pkcs1_pem(LineEnding::LF)
                .map(String::into_bytes)
                .map_err(|e| {
                    ProtocolError::HandshakeError(format!("{}: {e}", constants::ERR_KEY_EXPORT))
                }),
            KeyPair::X25519 { public, .. } => Ok(public.as_bytes().to_vec()),
        }
    }

    /// Consume the key pair and the peer's key into this side's encryptor/decryptor
    pub fn into_session(self, peer: PeerPublicKey, role: Role) -> Result<SessionKeys> {
        match (self, peer) {
            (KeyPair::Rsa { private, .. }, PeerPublicKey::Rsa(peer)) => Ok(SessionKeys {
                encryptor: Encryptor::rsa(peer),
                decryptor: Decryptor::rsa(private),
            }),
            (KeyPair::X25519 { secret, public }, PeerPublicKey::X25519(peer)) => {
                let shared = secret.diffie_hellman(&peer);
                if !shared.was_contributory() {
                    return Err(ProtocolError::HandshakeError(
                        constants::ERR_NON_CONTRIBUTORY_KEY.into(),
                    ));
                }

                let (initiator, responder) = match role {
                    Role::Initiator => (public.to_bytes(), peer.to_bytes()),
                    Role::Responder => (peer.to_bytes(), public.to_bytes()),
                };
                let mut i2r = derive_key(shared.as_bytes(), &initiator, &responder, INITIATOR_TO_RESPONDER);
                let mut r2i = derive_key(shared.as_bytes(), &initiator, &responder, RESPONDER_TO_INITIATOR);

                let (send_key, recv_key) = match role {
                    Role::Initiator => (&i2r, &r2i),
                    Role::Responder => (&r2i, &i2r),
                };
                let keys = SessionKeys {
                    encryptor: Encryptor::sealed(send_key),
                    decryptor: Decryptor::sealed(recv_key),
                };

                i2r.zeroize();
                r2i.zeroize();
                Ok(keys)
            }
            _ => Err(ProtocolError::HandshakeError(
                "Peer key does not match the local cipher suite".into(),
            )),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("suite", &self.suite())
            .finish_non_exhaustive()
    }
}

fn derive_key(shared: &[u8; 32], initiator: &[u8; 32], responder: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(KDF_DOMAIN);
    hasher.update(label);
    hasher.update(shared);
    hasher.update(initiator);
    hasher.update(responder);
    hasher.finalize().into()
}

/// The peer's public key as received during the exchange
#[derive(Debug, Clone)]
pub enum PeerPublicKey {
    Rsa(RsaPublicKey),
    X25519(X25519Public),
}

impl PeerPublicKey {
    /// Parse key material received from the peer.
    ///
    /// # Errors
    /// Returns `ProtocolError::HandshakeError` for anything that is not a valid
    /// public key of the expected suite.
    pub fn import(suite: CipherSuite, bytes: &[u8]) -> Result<Self> {
        match suite {
            CipherSuite::Rsa => {
                let pem = std::str::from_utf8(bytes).map_err(|_| {
                    ProtocolError::HandshakeError(constants::ERR_MALFORMED_RSA_KEY.into())
                })?;
                RsaPublicKey::from_pkcs1_pem(pem)
                    .map(PeerPublicKey::Rsa)
                    .map_err(|e| {
                        ProtocolError::HandshakeError(format!(
                            "{}: {e}",
                            constants::ERR_MALFORMED_RSA_KEY
                        ))
                    })
            }
            CipherSuite::X25519 => {
                let raw: [u8; X25519_KEY_LEN] = bytes.try_into().map_err(|_| {
                    ProtocolError::HandshakeError(constants::ERR_MALFORMED_X25519_KEY.into())
                })?;
                Ok(PeerPublicKey::X25519(X25519Public::from(raw)))
            }
        }
    }
}

/// What one side holds after a successful exchange
pub struct SessionKeys {
    pub encryptor: Encryptor,
    pub decryptor: Decryptor,
}

enum EncryptorKind {
    Rsa(RsaPublicKey),
    Sealed(Crypto),
}

/// Encrypts outgoing messages for one peer
pub struct Encryptor {
    kind: EncryptorKind,
}

impl Encryptor {
    /// Bind to the peer's RSA public key
    pub fn rsa(peer: RsaPublicKey) -> Self {
        Self {
            kind: EncryptorKind::Rsa(peer),
        }
    }

    /// Bind to a derived XChaCha20-Poly1305 session key
    pub fn sealed(key: &[u8; 32]) -> Self {
        Self {
            kind: EncryptorKind::Sealed(Crypto::new(key)),
        }
    }

    /// Largest plaintext accepted, if the suite has a ceiling
    pub fn capacity(&self) -> Option<usize> {
        match &self.kind {
            EncryptorKind::Rsa(key) => Some(key.size().saturating_sub(PKCS1_OVERHEAD)),
            EncryptorKind::Sealed(_) => None,
        }
    }

    /// Encrypt `plaintext` for the peer.
    ///
    /// # Errors
    /// - `ProtocolError::PayloadTooLarge` if the plaintext exceeds [`Self::capacity`]
    /// - `ProtocolError::EncryptionFailure` if the cipher itself fails
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if let Some(capacity) = self.capacity() {
            if plaintext.len() > capacity {
                return Err(ProtocolError::PayloadTooLarge {
                    size: plaintext.len(),
                    capacity,
                });
            }
        }

        match &self.kind {
            EncryptorKind::Rsa(key) => key
                .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
                .map_err(|_| ProtocolError::EncryptionFailure),
            EncryptorKind::Sealed(crypto) => crypto.seal(plaintext),
        }
    }
}

enum DecryptorKind {
    Rsa(RsaPrivateKey),
    Sealed(Crypto),
}

/// Decrypts incoming messages with this side's own key
pub struct Decryptor {
    kind: DecryptorKind,
}

impl Decryptor {
    pub fn rsa(private: RsaPrivateKey) -> Self {
        Self {
            kind: DecryptorKind::Rsa(private),
        }
    }

    pub fn sealed(key: &[u8; 32]) -> Self {
        Self {
            kind: DecryptorKind::Sealed(Crypto::new(key)),
        }
    }

    /// # Errors
    /// Returns `ProtocolError::DecryptionFailure` for ciphertext this key cannot open
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match &self.kind {
            DecryptorKind::Rsa(key) => key
                .decrypt(Pkcs1v15Encrypt, ciphertext)
                .map_err(|_| ProtocolError::DecryptionFailure),
            DecryptorKind::Sealed(crypto) => crypto.open(ciphertext),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn x25519_pair() -> (SessionKeys, SessionKeys) {
        let initiator = KeyPair::generate(CipherSuite::X25519, 0).unwrap();
        let responder = KeyPair::generate(CipherSuite::X25519, 0).unwrap();
        let i_pub = PeerPublicKey::import(CipherSuite::X25519, &initiator.export_public().unwrap()).unwrap();
        let r_pub = PeerPublicKey::import(CipherSuite::X25519, &responder.export_public().unwrap()).unwrap();
        (
            initiator.into_session(r_pub, Role::Initiator).unwrap(),
            responder.into_session(i_pub, Role::Responder).unwrap(),
        )
    }

    #[test]
    fn test_suite_parsing() {
        assert_eq!("rsa".parse::<CipherSuite>().unwrap(), CipherSuite::Rsa);
        assert_eq!(" X25519 ".parse::<CipherSuite>().unwrap(), CipherSuite::X25519);
        assert!("aes".parse::<CipherSuite>().is_err());
        assert_eq!(CipherSuite::X25519.to_string(), "x25519");
    }

    #[test]
    fn test_x25519_sessions_agree_in_both_directions() {
        let (client, server) = x25519_pair();

        let to_server = client.encryptor.encrypt(b"hi server").unwrap();
        assert_eq!(server.decryptor.decrypt(&to_server).unwrap(), b"hi server");

        let to_client = server.encryptor.encrypt(b"hi client").unwrap();
        assert_eq!(client.decryptor.decrypt(&to_client).unwrap(), b"hi client");
    }

    #[test]
    fn test_x25519_directions_use_distinct_keys() {
        let (client, _server) = x25519_pair();
        let sealed = client.encryptor.encrypt(b"echo").unwrap();
        // a client must not be able to read its own outgoing traffic
        assert!(client.decryptor.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_x25519_has_no_capacity_ceiling() {
        let (client, server) = x25519_pair();
        assert_eq!(client.encryptor.capacity(), None);
        let big = vec![0x5Au8; 64 * 1024];
        let sealed = client.encryptor.encrypt(&big).unwrap();
        assert_eq!(server.decryptor.decrypt(&sealed).unwrap(), big);
    }

    #[test]
    fn test_x25519_import_rejects_wrong_length() {
        let err = PeerPublicKey::import(CipherSuite::X25519, &[1u8; 31]).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeError(_)));
    }

    #[test]
    fn test_x25519_rejects_low_order_peer_key() {
        let own = KeyPair::generate(CipherSuite::X25519, 0).unwrap();
        let zero = PeerPublicKey::import(CipherSuite::X25519, &[0u8; 32]).unwrap();
        assert!(matches!(
            own.into_session(zero, Role::Initiator),
            Err(ProtocolError::HandshakeError(_))
        ));
    }

    #[test]
    fn test_rsa_import_rejects_garbage() {
        for bytes in [&b"not a key"[..], &[0xFFu8; 40][..], b""] {
            assert!(matches!(
                PeerPublicKey::import(CipherSuite::Rsa, bytes),
                Err(ProtocolError::HandshakeError(_))
            ));
        }
    }

    #[test]
    fn test_mismatched_suites_fail() {
        let own = KeyPair::generate(CipherSuite::X25519, 0).unwrap();
        let rsa = KeyPair::generate(CipherSuite::Rsa, 1024).unwrap();
        let peer = PeerPublicKey::import(CipherSuite::Rsa, &rsa.export_public().unwrap()).unwrap();
        assert!(matches!(
            own.into_session(peer, Role::Responder),
            Err(ProtocolError::HandshakeError(_))
        ));
    }
}
