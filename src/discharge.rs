//! client-side discharge acquisition
//!
//! Before presenting a macaroon carrying third-party caveats, a client
//! must collect one discharge per caveat (and per caveat of those
//! discharges, recursively) and bind each to the primary. The walk is
//! breadth-first; the fetch itself is host-provided, usually an HTTP
//! round trip to the caveat's location.

use std::collections::VecDeque;

use crate::checkers::Caveat;
use crate::crypto::KeyPair;
use crate::error::Error;
use crate::macaroon::{self, Macaroon};
use crate::service;

/// Bound on discharge recursion depth; adversarial chains of
/// discharges-needing-discharges fail rather than loop.
const MAX_DISCHARGE_HOPS: usize = 10;

/// Collects discharges for all third-party caveats of `m`, recursively,
/// and binds each to `m`. Returns the slice `[m, discharges...]` ready
/// to present.
///
/// `get_discharge` is invoked with the primary's location and the
/// caveat to discharge, and must return the discharge macaroon, usually
/// by contacting the service at the caveat's location.
pub fn discharge_all<F>(m: &Macaroon, get_discharge: F) -> Result<Vec<Macaroon>, Error>
where
    F: FnMut(&str, &macaroon::Caveat) -> Result<Macaroon, Error>,
{
    discharge_all_with_key(m, get_discharge, None)
}

/// Like [`discharge_all`], but additionally self-discharges caveats at
/// location `"local"` with the given key, offline. Such caveats are
/// created by
/// [`local_third_party_caveat`](crate::local_third_party_caveat) and
/// are sealed under the client's own public key with the fixed
/// condition `"true"`.
pub fn discharge_all_with_key<F>(
    m: &Macaroon,
    mut get_discharge: F,
    local_key: Option<&KeyPair>,
) -> Result<Vec<Macaroon>, Error>
where
    F: FnMut(&str, &macaroon::Caveat) -> Result<Macaroon, Error>,
{
    let primary_signature = m.signature();
    let first_party_location = m.location().to_owned();
    let mut slice = vec![m.clone()];

    let mut need: VecDeque<(macaroon::Caveat, usize)> = m
        .caveats()
        .iter()
        .filter(|caveat| caveat.is_third_party())
        .map(|caveat| (caveat.clone(), 1))
        .collect();

    while let Some((caveat, hops)) = need.pop_front() {
        if hops > MAX_DISCHARGE_HOPS {
            return Err(Error::DischargeLimitExceeded);
        }
        let mut discharge = match (local_key, caveat.location()) {
            (Some(key), "local") => {
                let (discharge, _) = service::discharge(key, &local_checker, caveat.id())?;
                discharge
            }
            _ => get_discharge(&first_party_location, &caveat)?,
        };
        discharge.bind_for_request(&primary_signature);
        need.extend(
            discharge
                .caveats()
                .iter()
                .filter(|caveat| caveat.is_third_party())
                .map(|caveat| (caveat.clone(), hops + 1)),
        );
        slice.push(discharge);
    }
    Ok(slice)
}

/// Checker for self-discharged local caveats: the sealed condition is
/// always exactly `"true"`.
fn local_checker(_caveat_id: &[u8], condition: &str) -> Result<Vec<Caveat>, Error> {
    if condition == "true" {
        Ok(Vec::new())
    } else {
        Err(Error::CaveatNotRecognized)
    }
}
