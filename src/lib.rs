//! Macaroon minting, verification and discharge
//!
//! Macaroons are bearer tokens with two properties that set them apart
//! from plain signed cookies:
//!
//! * offline attenuation: any holder can append *caveats* (predicates
//!   restricting where, when and by whom the token may be used),
//!   producing a new valid token without contacting the issuer;
//! * third-party caveats: a caveat may delegate its check to another
//!   service, which proves it holds by minting a *discharge macaroon*
//!   that the client presents alongside the original.
//!
//! Both rest on a chain of HMAC-SHA-256 signatures: caveats can be
//! added but never removed or altered, and a service holding the root
//! key can verify the whole chain, discharges included, without any
//! per-token server state beyond the root key itself.
//!
//! This crate is the bakery: the layer that turns the raw primitive
//! into a service. It is transport- and storage-agnostic; bring your
//! own HTTP layer and persistent store.
//!
//! # Usage
//!
//! Most interaction goes through [Service]: it mints macaroons bound
//! to freshly generated root keys, persists those keys, routes caveats
//! by location, and verifies presented macaroon slices:
//!
//! ```rust
//! use std::collections::HashMap;
//!
//! use macaroon_bakery::checkers::{self, MultiChecker};
//! use macaroon_bakery::{MemStorage, NewServiceParams, Service};
//!
//! fn main() -> Result<(), macaroon_bakery::Error> {
//!     let svc = Service::new(NewServiceParams {
//!         location: "https://api.example.com".to_owned(),
//!         store: Some(Box::new(MemStorage::new())),
//!         ..NewServiceParams::default()
//!     });
//!
//!     // mint a macaroon that expires in an hour
//!     let expires = time::OffsetDateTime::now_utc() + time::Duration::hours(1);
//!     let m = svc.new_macaroon(None, None, &[checkers::time_before_caveat(expires)])?;
//!
//!     // ...the client presents it back...
//!     let (declared, _) =
//!         svc.check_any(&[vec![m]], &HashMap::new(), &MultiChecker::new(vec![]))?;
//!     assert!(declared.is_empty());
//!     Ok(())
//! }
//! ```
//!
//! Third-party caveats are sealed for the third party's Curve25519
//! public key, found through the service's
//! [locator](crate::PublicKeyLocator). The third party discharges them
//! with [`Service::discharge`]; clients collect and bind the resulting
//! discharges with [discharge_all]. See `tests/bakery.rs` for the
//! full two-service dance.

pub mod checkers;
mod codec;
mod crypto;
mod discharge;
pub mod error;
pub mod format;
pub mod macaroon;
mod service;
mod storage;

pub use crypto::{KeyPair, PrivateKey, PublicKey, PublicKeyLocator, PublicKeyRing, KEY_LEN};
pub use discharge::{discharge_all, discharge_all_with_key};
pub use error::Error;
pub use macaroon::Macaroon;
pub use service::{
    discharge, local_third_party_caveat, FirstPartyChecker, NewServiceParams, Service,
    ThirdPartyChecker,
};
pub use storage::{MemStorage, Storage, StorageItem};
