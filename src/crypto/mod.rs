//! cryptographic key handling
//!
//! Third-party caveats are sealed with Curve25519 public-key boxes
//! (X25519 key agreement + XSalsa20-Poly1305), wire-compatible with
//! NaCl `box`. This module holds the key types, their byte and textual
//! encodings, and the locator used to look up a third party's public
//! key by location.
//!
//! The implementation is based on [crypto_box](https://github.com/RustCrypto/nacl-compat).

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use rand_core::{CryptoRng, RngCore};

use crate::error::Error;

/// length in bytes of public and private Curve25519 keys
pub const KEY_LEN: usize = 32;

/// length in bytes of a box or secretbox nonce
pub(crate) const NONCE_LEN: usize = 24;

/// length in bytes of the Poly1305 authentication overhead added by a
/// box or secretbox
pub(crate) const BOX_OVERHEAD: usize = 16;

/// pair of Curve25519 keys used by a service to seal and open
/// third-party caveat ids
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub(crate) private: PrivateKey,
    pub(crate) public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut rand::rngs::OsRng)
    }

    pub fn generate_with_rng<T: RngCore + CryptoRng>(rng: &mut T) -> Self {
        let secret = crypto_box::SecretKey::generate(rng);
        let public = PublicKey(secret.public_key());
        KeyPair {
            private: PrivateKey(secret),
            public,
        }
    }

    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public();
        KeyPair { private, public }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }
}

/// the private part of a [KeyPair]
///
/// The underlying key memory is zeroed on drop.
#[derive(Clone, Debug)]
pub struct PrivateKey(pub(crate) crypto_box::SecretKey);

impl PrivateKey {
    /// serializes to a byte array
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    /// deserializes from a byte array
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::KeyDecode(format!("invalid key size {}", bytes.len())))?;
        Ok(PrivateKey(crypto_box::SecretKey::from(bytes)))
    }

    /// returns the matching public key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }
}

/// the public part of a [KeyPair]
///
/// The textual form is the base64 (standard alphabet, no padding)
/// encoding of the 32 key bytes, as published in public-key rings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(pub(crate) crypto_box::PublicKey);

impl PublicKey {
    /// serializes to a byte array
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        *self.0.as_bytes()
    }

    /// deserializes from a byte array
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::KeyDecode(format!("invalid key size {}", bytes.len())))?;
        Ok(PublicKey(crypto_box::PublicKey::from(bytes)))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            base64::encode_config(self.to_bytes(), base64::STANDARD_NO_PAD)
        )
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = base64::decode_config(s, base64::STANDARD_NO_PAD)
            .map_err(|e| Error::KeyDecode(e.to_string()))?;
        PublicKey::from_bytes(&bytes)
    }
}

/// A directory from third-party locations to their public keys,
/// consulted when adding a third-party caveat.
///
/// Lookups must be synchronous and side-effect-free; a locator is
/// read-only while requests are being served.
pub trait PublicKeyLocator: Send + Sync {
    fn public_key_for_location(&self, location: &str) -> Result<PublicKey, Error>;
}

/// An in-memory [PublicKeyLocator] mapping exact location strings to
/// public keys. An empty ring fails every lookup, which makes it the
/// right default for services that never add third-party caveats.
#[derive(Debug, Default)]
pub struct PublicKeyRing {
    keys: HashMap<String, PublicKey>,
}

impl PublicKeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the public key for a third-party location, replacing
    /// any previous entry.
    pub fn insert(&mut self, location: impl Into<String>, key: PublicKey) {
        self.keys.insert(location.into(), key);
    }
}

impl PublicKeyLocator for PublicKeyRing {
    fn public_key_for_location(&self, location: &str) -> Result<PublicKey, Error> {
        self.keys
            .get(location)
            .cloned()
            .ok_or_else(|| Error::PublicKeyLookup {
                location: location.to_owned(),
                reason: "no public key registered".to_owned(),
            })
    }
}
