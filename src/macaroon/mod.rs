//! the macaroon primitive
//!
//! A macaroon is a bearer token whose authority is a running
//! HMAC-SHA-256 chain: the signature of a freshly minted macaroon is an
//! HMAC over its id under a key derived from the root key, and every
//! appended caveat folds itself into that signature. Holders can only
//! ever *attenuate* a macaroon; removing or altering a caveat breaks
//! the chain.
//!
//! Third-party caveats additionally seal a fresh discharge root key
//! into the running signature, so that a discharge macaroon minted by
//! the third party can be verified recursively without the verifier
//! ever seeing that key in the clear.

use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::{BOX_OVERHEAD, NONCE_LEN};
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// length in bytes of a macaroon signature (an HMAC-SHA-256 tag)
pub const SIGNATURE_LEN: usize = 32;

/// HMAC key under which macaroon root keys are derived, zero-padded to
/// the HMAC block-input size
const KEY_GENERATOR: &[u8] = b"macaroons-key-generator";

/// A macaroon: `{location, id, caveats, signature}`.
///
/// The location is advisory and unauthenticated; the id names the
/// macaroon to its issuer; the signature authenticates the id and every
/// caveat, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Macaroon {
    pub(crate) location: String,
    pub(crate) id: Vec<u8>,
    pub(crate) caveats: Vec<Caveat>,
    pub(crate) signature: [u8; SIGNATURE_LEN],
}

/// A caveat as carried on the wire inside a macaroon.
///
/// First-party caveats store their condition in `id` and leave
/// `verification_id` and `location` empty. Third-party caveats carry an
/// opaque encrypted id, the sealed discharge root key in
/// `verification_id`, and the third party's location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caveat {
    pub(crate) id: Vec<u8>,
    pub(crate) verification_id: Vec<u8>,
    pub(crate) location: String,
}

impl Caveat {
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_third_party(&self) -> bool {
        !self.verification_id.is_empty()
    }

    pub fn is_first_party(&self) -> bool {
        self.verification_id.is_empty()
    }
}

impl Macaroon {
    /// Creates a macaroon with the given id and advisory location,
    /// signed by a key derived from `root_key`.
    pub fn new(root_key: &[u8], id: impl Into<Vec<u8>>, location: impl Into<String>) -> Macaroon {
        let id = id.into();
        let derived = make_key(root_key);
        let signature = keyed_hash(&derived, &id);
        Macaroon {
            location: location.into(),
            id,
            caveats: Vec::new(),
            signature,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    pub fn signature(&self) -> [u8; SIGNATURE_LEN] {
        self.signature
    }

    /// Appends a first-party caveat, a condition the target service
    /// checks itself at verification time.
    pub fn add_first_party_caveat(&mut self, condition: impl Into<String>) {
        let id = condition.into().into_bytes();
        self.signature = keyed_hash2(&self.signature, &[], &id);
        self.caveats.push(Caveat {
            id,
            verification_id: Vec::new(),
            location: String::new(),
        });
    }

    /// Appends a third-party caveat. `caveat_id` is the opaque id the
    /// third party will be asked to discharge; `root_key` is the fresh
    /// secret sealed into both the id and this macaroon's signature
    /// chain.
    pub fn add_third_party_caveat(
        &mut self,
        root_key: &[u8],
        caveat_id: Vec<u8>,
        location: impl Into<String>,
    ) -> Result<(), Error> {
        let sealer = XSalsa20Poly1305::new(GenericArray::from_slice(&self.signature));
        let mut nonce = [0; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = sealer
            .encrypt(GenericArray::from_slice(&nonce), root_key)
            .map_err(|_| Error::InvalidCaveat("cannot seal third-party caveat root key".to_owned()))?;

        let mut verification_id = Vec::with_capacity(NONCE_LEN + sealed.len());
        verification_id.extend_from_slice(&nonce);
        verification_id.extend_from_slice(&sealed);

        self.signature = keyed_hash2(&self.signature, &verification_id, &caveat_id);
        self.caveats.push(Caveat {
            id: caveat_id,
            verification_id,
            location: location.into(),
        });
        Ok(())
    }

    /// Binds this macaroon, acting as a discharge, to the primary
    /// macaroon with the given signature. A bound discharge cannot be
    /// replayed against any other primary.
    pub fn bind_for_request(&mut self, primary_signature: &[u8; SIGNATURE_LEN]) {
        self.signature = keyed_hash2(&[0; SIGNATURE_LEN], primary_signature, &self.signature);
    }

    /// Verifies this macaroon against its root key.
    ///
    /// `check` is invoked for every first-party caveat condition, in
    /// order, across this macaroon and every discharge used; any error
    /// it returns fails the verification. Discharges are matched by id
    /// and each may be used at most once; discharges must have been
    /// bound to this macaroon with [`Macaroon::bind_for_request`].
    /// Unused discharges are not an error.
    pub fn verify<F>(&self, root_key: &[u8], mut check: F, discharges: &[Macaroon]) -> Result<(), Error>
    where
        F: FnMut(&str) -> Result<(), Error>,
    {
        let derived = make_key(root_key);
        let mut used = vec![false; discharges.len()];
        self.verify_with_key(&derived, &self.signature, false, &mut check, discharges, &mut used)
    }

    fn verify_with_key<F>(
        &self,
        key: &[u8; 32],
        primary_signature: &[u8; SIGNATURE_LEN],
        is_discharge: bool,
        check: &mut F,
        discharges: &[Macaroon],
        used: &mut [bool],
    ) -> Result<(), Error>
    where
        F: FnMut(&str) -> Result<(), Error>,
    {
        let mut signature = Zeroizing::new(keyed_hash(key, &self.id));
        for caveat in &self.caveats {
            if caveat.is_third_party() {
                let caveat_root_key =
                    open_verification_id(&signature, &caveat.verification_id).ok_or_else(|| {
                        Error::verification(format!(
                            "cannot decrypt root key for caveat {:?}",
                            String::from_utf8_lossy(&caveat.id)
                        ))
                    })?;
                let (index, discharge) = discharges
                    .iter()
                    .enumerate()
                    .find(|(_, m)| m.id == caveat.id)
                    .ok_or_else(|| {
                        Error::verification(format!(
                            "cannot find discharge macaroon for caveat {:?}",
                            String::from_utf8_lossy(&caveat.id)
                        ))
                    })?;
                if used[index] {
                    return Err(Error::verification(format!(
                        "discharge macaroon {:?} was used more than once",
                        String::from_utf8_lossy(&discharge.id)
                    )));
                }
                used[index] = true;
                let derived = make_key(&caveat_root_key);
                discharge.verify_with_key(
                    &derived,
                    primary_signature,
                    true,
                    check,
                    discharges,
                    used,
                )?;
            } else {
                let condition = std::str::from_utf8(&caveat.id).map_err(|_| {
                    Error::verification("first-party caveat condition is not utf-8")
                })?;
                check(condition)?;
            }
            *signature = keyed_hash2(&signature, &caveat.verification_id, &caveat.id);
        }

        // a discharge is presented bound to the primary, so the chain
        // value must be bound before comparing
        let expected = if is_discharge {
            keyed_hash2(&[0; SIGNATURE_LEN], primary_signature, &*signature)
        } else {
            *signature
        };
        if bool::from(expected[..].ct_eq(&self.signature[..])) {
            Ok(())
        } else {
            Err(Error::verification("signature mismatch after caveat verification"))
        }
    }
}

/// HMAC-SHA-256 of `data` under `key`.
pub(crate) fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA-256 of `d1 || d2` under `key`.
fn keyed_hash2(key: &[u8; 32], d1: &[u8], d2: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(d1);
    mac.update(d2);
    mac.finalize().into_bytes().into()
}

/// Derives the HMAC chain key for a root key of any length.
pub(crate) fn make_key(root_key: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut generator = [0; 32];
    generator[..KEY_GENERATOR.len()].copy_from_slice(KEY_GENERATOR);
    Zeroizing::new(keyed_hash(&generator, root_key))
}

/// Opens a verification id (`nonce || secretbox ciphertext`) with the
/// running signature it was sealed under.
fn open_verification_id(signature: &[u8; 32], verification_id: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    if verification_id.len() < NONCE_LEN + BOX_OVERHEAD {
        return None;
    }
    let (nonce, sealed) = verification_id.split_at(NONCE_LEN);
    let opener = XSalsa20Poly1305::new(GenericArray::from_slice(signature));
    opener
        .decrypt(GenericArray::from_slice(nonce), sealed)
        .map(Zeroizing::new)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_KEY: &[u8] = b"super secret root key";

    fn accept_all(_: &str) -> Result<(), Error> {
        Ok(())
    }

    #[test]
    fn verify_fresh_macaroon() {
        let m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "https://example.com");
        assert_eq!(m.id(), b"id-1");
        assert_eq!(m.location(), "https://example.com");
        assert!(m.caveats().is_empty());
        m.verify(ROOT_KEY, accept_all, &[]).unwrap();
    }

    #[test]
    fn wrong_root_key_fails() {
        let m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        let err = m.verify(b"some other key", accept_all, &[]).unwrap_err();
        assert_eq!(
            err,
            Error::Verification("signature mismatch after caveat verification".to_owned())
        );
    }

    #[test]
    fn first_party_caveats_feed_the_chain() {
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        let fresh_signature = m.signature();
        m.add_first_party_caveat("account = 42");
        m.add_first_party_caveat("time < never");
        assert_ne!(m.signature(), fresh_signature);

        let mut seen = Vec::new();
        m.verify(
            ROOT_KEY,
            |condition| {
                seen.push(condition.to_owned());
                Ok(())
            },
            &[],
        )
        .unwrap();
        assert_eq!(seen, vec!["account = 42", "time < never"]);
    }

    #[test]
    fn checker_rejection_propagates() {
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_first_party_caveat("account = 42");

        let err = m
            .verify(
                ROOT_KEY,
                |_| Err(Error::ConditionFailed("nope".to_owned())),
                &[],
            )
            .unwrap_err();
        assert_eq!(err, Error::ConditionFailed("nope".to_owned()));
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_first_party_caveat("account = 42");

        let mut with_bad_id = m.clone();
        with_bad_id.id[0] ^= 1;
        assert!(with_bad_id.verify(ROOT_KEY, accept_all, &[]).is_err());

        let mut with_bad_caveat = m.clone();
        with_bad_caveat.caveats[0].id[0] ^= 1;
        assert!(with_bad_caveat.verify(ROOT_KEY, accept_all, &[]).is_err());

        let mut with_bad_signature = m.clone();
        with_bad_signature.signature[0] ^= 1;
        assert!(with_bad_signature.verify(ROOT_KEY, accept_all, &[]).is_err());

        let mut with_dropped_caveat = m.clone();
        with_dropped_caveat.caveats.clear();
        assert!(with_dropped_caveat.verify(ROOT_KEY, accept_all, &[]).is_err());

        m.verify(ROOT_KEY, accept_all, &[]).unwrap();
    }

    #[test]
    fn third_party_caveat_with_bound_discharge() {
        let caveat_root_key = b"third party root key";
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_third_party_caveat(caveat_root_key, b"cav-1".to_vec(), "https://auth")
            .unwrap();

        let mut discharge = Macaroon::new(caveat_root_key, b"cav-1".to_vec(), "");
        discharge.bind_for_request(&m.signature());

        m.verify(ROOT_KEY, accept_all, &[discharge]).unwrap();
    }

    #[test]
    fn missing_discharge_fails() {
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_third_party_caveat(b"third party root key", b"cav-1".to_vec(), "https://auth")
            .unwrap();

        let err = m.verify(ROOT_KEY, accept_all, &[]).unwrap_err();
        assert_eq!(
            err,
            Error::Verification(
                "cannot find discharge macaroon for caveat \"cav-1\"".to_owned()
            )
        );
    }

    #[test]
    fn unbound_discharge_fails() {
        let caveat_root_key = b"third party root key";
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_third_party_caveat(caveat_root_key, b"cav-1".to_vec(), "https://auth")
            .unwrap();

        let discharge = Macaroon::new(caveat_root_key, b"cav-1".to_vec(), "");
        let err = m.verify(ROOT_KEY, accept_all, &[discharge]).unwrap_err();
        assert_eq!(
            err,
            Error::Verification("signature mismatch after caveat verification".to_owned())
        );
    }

    #[test]
    fn discharge_bound_to_another_primary_fails() {
        let caveat_root_key = b"third party root key";
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_third_party_caveat(caveat_root_key, b"cav-1".to_vec(), "https://auth")
            .unwrap();

        let other = Macaroon::new(b"other root key", b"id-2".to_vec(), "");
        let mut discharge = Macaroon::new(caveat_root_key, b"cav-1".to_vec(), "");
        discharge.bind_for_request(&other.signature());

        assert!(m.verify(ROOT_KEY, accept_all, &[discharge]).is_err());
    }

    #[test]
    fn discharge_reuse_fails() {
        let caveat_root_key = b"third party root key";
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_third_party_caveat(caveat_root_key, b"cav-1".to_vec(), "https://auth")
            .unwrap();
        m.add_third_party_caveat(caveat_root_key, b"cav-1".to_vec(), "https://auth")
            .unwrap();

        let mut discharge = Macaroon::new(caveat_root_key, b"cav-1".to_vec(), "");
        discharge.bind_for_request(&m.signature());

        let err = m.verify(ROOT_KEY, accept_all, &[discharge]).unwrap_err();
        assert_eq!(
            err,
            Error::Verification(
                "discharge macaroon \"cav-1\" was used more than once".to_owned()
            )
        );
    }

    #[test]
    fn discharges_can_carry_their_own_caveats() {
        let caveat_root_key = b"third party root key";
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_third_party_caveat(caveat_root_key, b"cav-1".to_vec(), "https://auth")
            .unwrap();

        let mut discharge = Macaroon::new(caveat_root_key, b"cav-1".to_vec(), "");
        discharge.add_first_party_caveat("declared username alice");
        discharge.bind_for_request(&m.signature());

        let mut seen = Vec::new();
        m.verify(
            ROOT_KEY,
            |condition| {
                seen.push(condition.to_owned());
                Ok(())
            },
            &[discharge],
        )
        .unwrap();
        assert_eq!(seen, vec!["declared username alice"]);
    }

    #[test]
    fn unused_discharges_are_tolerated() {
        let caveat_root_key = b"third party root key";
        let mut m = Macaroon::new(ROOT_KEY, b"id-1".to_vec(), "");
        m.add_third_party_caveat(caveat_root_key, b"cav-1".to_vec(), "https://auth")
            .unwrap();

        let mut discharge = Macaroon::new(caveat_root_key, b"cav-1".to_vec(), "");
        discharge.bind_for_request(&m.signature());
        let mut stray = Macaroon::new(b"unrelated", b"stray".to_vec(), "");
        stray.bind_for_request(&m.signature());

        m.verify(ROOT_KEY, accept_all, &[discharge, stray]).unwrap();
    }
}
