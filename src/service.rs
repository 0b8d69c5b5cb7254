//! the bakery service
//!
//! A [Service] composes the macaroon primitive, the caveat-id codec,
//! the checker registry, and a root-key store into the operations a
//! real deployment needs: minting macaroons, attaching caveats (routed
//! by location), verifying presented macaroon slices, and discharging
//! third-party caveats addressed to it.

use std::collections::{HashMap, HashSet};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;
use zeroize::Zeroizing;

use crate::checkers::{
    self, declared_caveat, parse_caveat, Caveat, ChainChecker, Checker, COND_NEED_DECLARED,
};
use crate::codec::{BoxDecoder, BoxEncoder, ROOT_KEY_LEN};
use crate::crypto::{KeyPair, PublicKey, PublicKeyLocator, PublicKeyRing};
use crate::error::Error;
use crate::macaroon::Macaroon;
use crate::storage::{Storage, StorageItem};

/// Checks a complete first-party caveat string. The service invokes
/// this for every first-party caveat encountered during verification.
///
/// Every [`checkers::Checker`] is a `FirstPartyChecker`: the caveat is
/// parsed into `(cond, arg)` and dispatched, and failures are wrapped
/// as [`Error::CaveatNotSatisfied`] naming the offending caveat.
pub trait FirstPartyChecker {
    fn check_first_party_caveat(&self, caveat: &str) -> Result<(), Error>;
}

impl<C: Checker + ?Sized> FirstPartyChecker for C {
    fn check_first_party_caveat(&self, caveat: &str) -> Result<(), Error> {
        let parsed = parse_caveat(caveat);
        let result = match parsed {
            Ok((cond, arg)) => self.check(cond, arg),
            Err(e) => Err(e),
        };
        result.map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            e => Error::CaveatNotSatisfied {
                caveat: caveat.to_owned(),
                reason: e.to_string(),
            },
        })
    }
}

/// Checks a third-party caveat condition for validity. On success it
/// may return extra caveats to be added to the discharge macaroon. The
/// `caveat_id` parameter holds the still-encoded id of the caveat.
///
/// A checker that does not understand the condition must return
/// [`Error::CaveatNotRecognized`].
pub trait ThirdPartyChecker {
    fn check_third_party_caveat(&self, caveat_id: &[u8], condition: &str)
        -> Result<Vec<Caveat>, Error>;
}

impl<F> ThirdPartyChecker for F
where
    F: Fn(&[u8], &str) -> Result<Vec<Caveat>, Error>,
{
    fn check_third_party_caveat(
        &self,
        caveat_id: &[u8],
        condition: &str,
    ) -> Result<Vec<Caveat>, Error> {
        self(caveat_id, condition)
    }
}

/// Parameters for [`Service::new`].
#[derive(Default)]
pub struct NewServiceParams {
    /// Location recorded in every macaroon the service mints.
    pub location: String,

    /// Store for minted root keys. Without one the service can still
    /// mint and discharge, and verify via
    /// [`Service::check_with_key`], but [`Service::check`] is
    /// unavailable.
    pub store: Option<Box<dyn Storage>>,

    /// Key pair for third-party caveat encryption; generated if
    /// absent.
    pub key: Option<KeyPair>,

    /// Public keys of third-party services by location. Defaults to an
    /// empty ring, with which no third-party caveats can be created.
    pub locator: Option<Box<dyn PublicKeyLocator>>,
}

/// A service that uses macaroons to check authorization.
pub struct Service {
    location: String,
    store: Option<Box<dyn Storage>>,
    key: KeyPair,
    locator: Box<dyn PublicKeyLocator>,
    encoder: BoxEncoder,
}

impl Service {
    pub fn new(p: NewServiceParams) -> Service {
        let key = p.key.unwrap_or_else(KeyPair::generate);
        let locator = p
            .locator
            .unwrap_or_else(|| Box::new(PublicKeyRing::new()));
        Service {
            location: p.location,
            store: p.store,
            encoder: BoxEncoder::new(key.clone()),
            key,
            locator,
        }
    }

    /// The location recorded in macaroons minted by this service.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The service's public key, for publication in locator rings.
    pub fn public_key(&self) -> &PublicKey {
        self.key.public()
    }

    /// The configured root-key store, if any.
    pub fn store(&self) -> Option<&dyn Storage> {
        self.store.as_deref()
    }

    /// Mints a new macaroon with the given id and caveats and persists
    /// its root key. A random root key and a random (hex-encoded) id
    /// are generated when not supplied.
    pub fn new_macaroon(
        &self,
        id: Option<&[u8]>,
        root_key: Option<&[u8]>,
        caveats: &[Caveat],
    ) -> Result<Macaroon, Error> {
        let root_key: Zeroizing<Vec<u8>> = match root_key {
            Some(key) => Zeroizing::new(key.to_vec()),
            None => Zeroizing::new(random_bytes(ROOT_KEY_LEN)),
        };
        let id = match id {
            Some(id) => id.to_vec(),
            None => hex::encode(random_bytes(ROOT_KEY_LEN)).into_bytes(),
        };
        let mut m = Macaroon::new(&root_key, id, self.location.clone());
        for caveat in caveats {
            self.add_caveat(&mut m, caveat.clone())?;
        }
        if let Some(store) = &self.store {
            store.put(
                m.id(),
                StorageItem {
                    root_key: root_key.to_vec(),
                    expiry: checkers::expiry_time(m.caveats()),
                },
            )?;
        }
        Ok(m)
    }

    /// Adds a caveat to the given macaroon, routing by location.
    ///
    /// An empty location appends a first-party caveat. The special
    /// prefix `"local "` carries a client public key inline: the caveat
    /// becomes a third-party caveat at location `"local"` with the
    /// fixed condition `"true"`, sealed under that key, so its holder
    /// can discharge it offline (see
    /// [`discharge_all_with_key`](crate::discharge_all_with_key)).
    /// Any other location is resolved through the service's locator.
    pub fn add_caveat(&self, m: &mut Macaroon, caveat: Caveat) -> Result<(), Error> {
        if caveat.location.is_empty() {
            m.add_first_party_caveat(caveat.condition);
            return Ok(());
        }
        let (third_party_pub, location, condition) =
            match caveat.location.strip_prefix("local ") {
                Some(encoded_key) => {
                    let key: PublicKey = encoded_key.parse().map_err(|e| {
                        Error::KeyDecode(format!(
                            "cannot parse client public key in local third-party caveat: {e}"
                        ))
                    })?;
                    if !caveat.condition.is_empty() {
                        return Err(Error::InvalidCaveat(
                            "cannot specify caveat condition in local third-party caveat"
                                .to_owned(),
                        ));
                    }
                    (key, "local".to_owned(), "true".to_owned())
                }
                None => {
                    let key = self.locator.public_key_for_location(&caveat.location)?;
                    (key, caveat.location, caveat.condition)
                }
            };

        let mut root_key = Zeroizing::new([0; ROOT_KEY_LEN]);
        OsRng.fill_bytes(&mut *root_key);
        let id = self
            .encoder
            .encode_caveat_id(&condition, &root_key, &third_party_pub)?;
        m.add_third_party_caveat(&root_key[..], id, location)
    }

    /// Checks that the given macaroons verify correctly, using the
    /// provided checker for first-party caveats. The primary macaroon
    /// is `ms[0]`; discharges fill the rest of the slice. The root key
    /// is fetched from the configured store by the primary's id.
    ///
    /// # Panics
    ///
    /// Panics if the service was created without a store; use
    /// [`Service::check_with_key`] instead.
    pub fn check(&self, ms: &[Macaroon], checker: &dyn FirstPartyChecker) -> Result<(), Error> {
        let Some(first) = ms.first() else {
            return Err(Error::Verification("no macaroons in slice".to_owned()));
        };
        let store = self
            .store
            .as_ref()
            .expect("store is not specified: use check_with_key or create the service with a store");
        let item = match store.get(first.id()) {
            Ok(item) => item,
            // likely removed after expiry, which should read as a
            // verification failure, not a hole in the store
            Err(Error::NotFound) => {
                return Err(Error::Verification("macaroon not found in storage".to_owned()))
            }
            Err(e) => return Err(e),
        };
        self.check_with_key(ms, &item.root_key, checker)
    }

    /// Like [`Service::check`], but with a caller-provided root key
    /// instead of a store lookup.
    pub fn check_with_key(
        &self,
        ms: &[Macaroon],
        root_key: &[u8],
        checker: &dyn FirstPartyChecker,
    ) -> Result<(), Error> {
        let Some(first) = ms.first() else {
            return Err(Error::Verification("no macaroons in slice".to_owned()));
        };
        first
            .verify(
                root_key,
                |caveat| checker.check_first_party_caveat(caveat),
                &ms[1..],
            )
            .map_err(wrap_verification)
    }

    /// Checks that at least one of the given macaroon slices verifies,
    /// trying them in order. Declared attributes are inferred from each
    /// candidate and overridden by `assert`; the resulting map backs
    /// the `declared` checker, composed with `checker` and the standard
    /// checker. On success, returns the inferred attributes and the
    /// slice that verified; on failure, the last candidate's error.
    pub fn check_any<'a>(
        &self,
        mss: &'a [Vec<Macaroon>],
        assert: &HashMap<String, String>,
        checker: &dyn Checker,
    ) -> Result<(HashMap<String, String>, &'a [Macaroon]), Error> {
        let std = checkers::std();
        let mut last_err = Error::Verification("no macaroons".to_owned());
        for ms in mss {
            let mut declared = checkers::infer_declared(ms);
            for (name, value) in assert {
                declared.insert(name.clone(), value.clone());
            }
            let declared_checker = checkers::Declared(declared);
            let composed = ChainChecker(vec![&declared_checker, checker, &std]);
            match self.check(ms, &composed) {
                Ok(()) => return Ok((declared_checker.0, ms)),
                Err(e) => last_err = e,
            }
        }
        Err(wrap_verification(last_err))
    }

    /// Discharges the third-party caveat with the given id, which must
    /// have been sealed for this service's key. The extra caveats
    /// returned by the checker are added to the discharge macaroon,
    /// re-encoding any third-party ones through this service's locator.
    pub fn discharge(&self, checker: &dyn ThirdPartyChecker, id: &[u8]) -> Result<Macaroon, Error> {
        let (mut m, caveats) = discharge(&self.key, checker, id)?;
        for caveat in caveats {
            self.add_caveat(&mut m, caveat)?;
        }
        Ok(m)
    }
}

/// Creates a macaroon discharging the third-party caveat with the given
/// id, sealed for `key.public()`. The condition inside the id is
/// checked by `checker`; on success the discharge macaroon is returned
/// along with any extra caveats the checker wants added to it, which
/// the caller is responsible for adding.
pub fn discharge(
    key: &KeyPair,
    checker: &dyn ThirdPartyChecker,
    id: &[u8],
) -> Result<(Macaroon, Vec<Caveat>), Error> {
    info!("server attempting to discharge {}", hex::encode(id));
    let decoder = BoxDecoder::new(key.clone());
    let (root_key, condition) = decoder.decode_caveat_id(id)?;
    // parse failures are not fatal here: the checker is allowed to see
    // even conditions we cannot make sense of
    let caveats = match parse_caveat(&condition) {
        Ok((COND_NEED_DECLARED, arg)) => check_need_declared(id, arg, checker)?,
        _ => checker.check_third_party_caveat(id, &condition)?,
    };
    // the discharge is deliberately never persisted: stored, it could
    // double as an ordinary authorization macaroon on the third party
    let m = Macaroon::new(&root_key, id.to_vec(), "");
    Ok((m, caveats))
}

fn check_need_declared(
    caveat_id: &[u8],
    arg: &str,
    checker: &dyn ThirdPartyChecker,
) -> Result<Vec<Caveat>, Error> {
    let (names, inner) = arg.split_once(' ').ok_or_else(|| {
        Error::InvalidCaveat(format!("need-declared caveat requires an argument, got {arg:?}"))
    })?;
    if names.is_empty() {
        return Err(Error::InvalidCaveat(format!(
            "need-declared caveat requires an argument, got {arg:?}"
        )));
    }
    let need: Vec<&str> = names.split(',').collect();
    if need.iter().any(|name| name.is_empty()) {
        return Err(Error::InvalidCaveat(
            "need-declared caveat with empty required attribute".to_owned(),
        ));
    }

    let mut caveats = checker.check_third_party_caveat(caveat_id, inner)?;

    let mut declared: HashSet<String> = HashSet::new();
    for caveat in &caveats {
        if !caveat.location.is_empty() {
            continue;
        }
        // unparseable conditions may be meaningful to someone else
        let Ok((cond, rest)) = parse_caveat(&caveat.condition) else {
            continue;
        };
        if cond != checkers::COND_DECLARED {
            continue;
        }
        let Some((name, _)) = rest.split_once(' ') else {
            return Err(Error::InvalidCaveat("declared caveat has no value".to_owned()));
        };
        declared.insert(name.to_owned());
    }
    // add empty declarations for every required attribute left unbound
    for name in need {
        if !declared.contains(name) {
            caveats.push(declared_caveat(name, ""));
        }
    }
    Ok(caveats)
}

/// Returns a third-party caveat that, once added to a macaroon with
/// [`Service::add_caveat`], results in a caveat at location `"local"`
/// sealed under the given client public key. The holder of the
/// matching private key can discharge it offline via
/// [`discharge_all_with_key`](crate::discharge_all_with_key).
pub fn local_third_party_caveat(key: &PublicKey) -> Caveat {
    Caveat::third_party(format!("local {key}"), "")
}

fn wrap_verification(e: Error) -> Error {
    match e {
        e @ Error::Verification(_) => e,
        Error::Cancelled => Error::Cancelled,
        e => Error::Verification(e.to_string()),
    }
}

fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0; n];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_declared_fills_in_missing_attributes() {
        let checker = |_: &[u8], condition: &str| -> Result<Vec<Caveat>, Error> {
            assert_eq!(condition, "access-allowed");
            Ok(vec![declared_caveat("username", "alice")])
        };
        let caveats =
            check_need_declared(b"id", "username,group access-allowed", &checker).unwrap();
        assert_eq!(
            caveats,
            vec![
                declared_caveat("username", "alice"),
                declared_caveat("group", ""),
            ]
        );
    }

    #[test]
    fn need_declared_leaves_full_declarations_alone() {
        let checker = |_: &[u8], _: &str| -> Result<Vec<Caveat>, Error> {
            Ok(vec![
                declared_caveat("username", "alice"),
                declared_caveat("group", "staff"),
            ])
        };
        let caveats = check_need_declared(b"id", "username,group cond", &checker).unwrap();
        assert_eq!(caveats.len(), 2);
    }

    #[test]
    fn need_declared_requires_an_argument() {
        let checker = |_: &[u8], _: &str| -> Result<Vec<Caveat>, Error> { Ok(vec![]) };
        assert!(matches!(
            check_need_declared(b"id", "lonely", &checker),
            Err(Error::InvalidCaveat(_))
        ));
        assert!(matches!(
            check_need_declared(b"id", " cond", &checker),
            Err(Error::InvalidCaveat(_))
        ));
        assert!(matches!(
            check_need_declared(b"id", "a,,b cond", &checker),
            Err(Error::InvalidCaveat(_))
        ));
    }

    #[test]
    fn need_declared_rejects_valueless_declarations() {
        let checker = |_: &[u8], _: &str| -> Result<Vec<Caveat>, Error> {
            Ok(vec![Caveat::first_party("declared broken")])
        };
        assert!(matches!(
            check_need_declared(b"id", "a cond", &checker),
            Err(Error::InvalidCaveat(_))
        ));
    }

    #[test]
    fn need_declared_ignores_third_party_extras() {
        let checker = |_: &[u8], _: &str| -> Result<Vec<Caveat>, Error> {
            Ok(vec![Caveat::third_party("https://other", "declared a 1")])
        };
        let caveats = check_need_declared(b"id", "a cond", &checker).unwrap();
        // the third-party caveat does not count as a declaration
        assert_eq!(caveats.len(), 2);
        assert_eq!(caveats[1], declared_caveat("a", ""));
    }
}
