//! encoding and decoding of third-party caveat ids
//!
//! A third-party caveat id is an opaque, authenticated envelope that
//! binds a fresh discharge root key to a condition. Only the third
//! party named by the caveat can open it:
//!
//! ```text
//! version(1) | target public key(32) | nonce(24) | sender public key(32) | box ciphertext
//! ```
//!
//! The box ciphertext seals `root-key(24) | condition` from the
//! encoding service's private key to the target's public key. The
//! sender's public key rides inside the envelope so that a decoder
//! needs nothing beyond its own key pair.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::SalsaBox;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::{KeyPair, PublicKey, BOX_OVERHEAD, KEY_LEN, NONCE_LEN};
use crate::error::Error;

/// version byte gating the envelope layout
const CAVEAT_ID_VERSION: u8 = 2;

/// caveat root keys sealed into an envelope are always this long
pub(crate) const ROOT_KEY_LEN: usize = 24;

/// smallest well-formed envelope: header plus a sealed empty condition
const MIN_CAVEAT_ID_LEN: usize = 1 + KEY_LEN + NONCE_LEN + KEY_LEN + BOX_OVERHEAD + ROOT_KEY_LEN;

pub(crate) struct BoxEncoder {
    key: KeyPair,
}

impl BoxEncoder {
    pub(crate) fn new(key: KeyPair) -> Self {
        BoxEncoder { key }
    }

    /// Seals `condition` and `root_key` under the third party's public
    /// key, producing the caveat id. Nonces are fresh per call.
    pub(crate) fn encode_caveat_id(
        &self,
        condition: &str,
        root_key: &[u8; ROOT_KEY_LEN],
        third_party_pub: &PublicKey,
    ) -> Result<Vec<u8>, Error> {
        let mut plain = Zeroizing::new(Vec::with_capacity(ROOT_KEY_LEN + condition.len()));
        plain.extend_from_slice(root_key);
        plain.extend_from_slice(condition.as_bytes());

        let sealer = SalsaBox::new(&third_party_pub.0, &self.key.private.0);
        let mut nonce = [0; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = sealer
            .encrypt(GenericArray::from_slice(&nonce), plain.as_slice())
            .map_err(|_| Error::CaveatIdEncode("cannot seal caveat id".to_owned()))?;

        let mut id = Vec::with_capacity(1 + KEY_LEN + NONCE_LEN + KEY_LEN + sealed.len());
        id.push(CAVEAT_ID_VERSION);
        id.extend_from_slice(&third_party_pub.to_bytes());
        id.extend_from_slice(&nonce);
        id.extend_from_slice(&self.key.public.to_bytes());
        id.extend_from_slice(&sealed);
        Ok(id)
    }
}

pub(crate) struct BoxDecoder {
    key: KeyPair,
}

impl BoxDecoder {
    pub(crate) fn new(key: KeyPair) -> Self {
        BoxDecoder { key }
    }

    /// Opens a caveat id sealed for this decoder's key pair, returning
    /// the discharge root key and the condition.
    pub(crate) fn decode_caveat_id(
        &self,
        id: &[u8],
    ) -> Result<(Zeroizing<Vec<u8>>, String), Error> {
        if id.len() < MIN_CAVEAT_ID_LEN {
            return Err(Error::CaveatIdDecode("caveat id too short".to_owned()));
        }
        if id[0] != CAVEAT_ID_VERSION {
            return Err(Error::CaveatIdDecode(format!(
                "unsupported caveat id version {}",
                id[0]
            )));
        }
        let (target, rest) = id[1..].split_at(KEY_LEN);
        if target != self.key.public.to_bytes() {
            return Err(Error::CaveatIdDecode("public key mismatch".to_owned()));
        }
        let (nonce, rest) = rest.split_at(NONCE_LEN);
        let (sender, sealed) = rest.split_at(KEY_LEN);
        let sender = PublicKey::from_bytes(sender)?;

        let opener = SalsaBox::new(&sender.0, &self.key.private.0);
        let plain = opener
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .map(Zeroizing::new)
            .map_err(|_| Error::CaveatIdDecode("cannot open caveat id".to_owned()))?;
        if plain.len() < ROOT_KEY_LEN {
            return Err(Error::CaveatIdDecode("sealed part too short".to_owned()));
        }

        let root_key = Zeroizing::new(plain[..ROOT_KEY_LEN].to_vec());
        let condition = std::str::from_utf8(&plain[ROOT_KEY_LEN..])
            .map_err(|_| Error::CaveatIdDecode("condition is not utf-8".to_owned()))?
            .to_owned();
        Ok((root_key, condition))
    }
}
