//! first-party caveat conditions and the checkers that satisfy them
//!
//! A condition is a UTF-8 string of the form `"<cond>"` or
//! `"<cond> <arg>"`, split on the first space. Checkers classify a
//! parsed condition as satisfied, failed, or (via
//! [`Error::CaveatNotRecognized`]) outside their vocabulary, in which
//! case composition falls through to the next checker in the chain.

use std::net::IpAddr;

use crate::error::Error;

mod declared;
mod operation;
mod time;

pub use declared::{declared_caveat, infer_declared, need_declared_caveat, Declared};
pub use operation::{allow_caveat, deny_caveat, OperationChecker};
pub use time::{expiry_time, time_before_caveat, TimeBefore};

pub const COND_DECLARED: &str = "declared";
pub const COND_TIME_BEFORE: &str = "time-before";
pub const COND_CLIENT_IP_ADDR: &str = "client-ip-addr";
pub const COND_ERROR: &str = "error";
pub const COND_NEED_DECLARED: &str = "need-declared";
pub const COND_ALLOW: &str = "allow";
pub const COND_DENY: &str = "deny";

/// A caveat as handed to the service before encoding: a condition plus
/// the location of the third party that must discharge it, empty for
/// first-party caveats.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caveat {
    pub location: String,
    pub condition: String,
}

impl Caveat {
    pub fn first_party(condition: impl Into<String>) -> Caveat {
        Caveat {
            location: String::new(),
            condition: condition.into(),
        }
    }

    pub fn third_party(location: impl Into<String>, condition: impl Into<String>) -> Caveat {
        Caveat {
            location: location.into(),
            condition: condition.into(),
        }
    }

    pub fn is_first_party(&self) -> bool {
        self.location.is_empty()
    }
}

/// Splits a condition into `(cond, arg)`, with `arg` possibly empty.
pub fn parse_caveat(caveat: &str) -> Result<(&str, &str), Error> {
    if caveat.is_empty() {
        return Err(Error::InvalidCaveat("empty caveat".to_owned()));
    }
    match caveat.split_once(' ') {
        Some(("", _)) => Err(Error::InvalidCaveat("caveat starts with space".to_owned())),
        Some((cond, arg)) => Ok((cond, arg)),
        None => Ok((caveat, "")),
    }
}

/// Checks a single parsed condition.
///
/// Returning [`Error::CaveatNotRecognized`] means the condition is
/// outside this checker's vocabulary; any other error means the
/// condition was understood and rejected.
pub trait Checker: Send + Sync {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error>;
}

impl<C: Checker + ?Sized> Checker for &C {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        (**self).check(cond, arg)
    }
}

impl<C: Checker + ?Sized> Checker for Box<C> {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        (**self).check(cond, arg)
    }
}

/// Adapts a function to the [Checker] trait.
pub struct CheckerFunc<F>(pub F);

impl<F> Checker for CheckerFunc<F>
where
    F: Fn(&str, &str) -> Result<(), Error> + Send + Sync,
{
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        (self.0)(cond, arg)
    }
}

/// An ordered composition of checkers: each is tried in registration
/// order and the first non-unrecognised result wins.
pub struct MultiChecker {
    checkers: Vec<Box<dyn Checker>>,
}

impl MultiChecker {
    pub fn new(checkers: Vec<Box<dyn Checker>>) -> MultiChecker {
        MultiChecker { checkers }
    }
}

impl Checker for MultiChecker {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        check_each(self.checkers.iter().map(|c| c.as_ref()), cond, arg)
    }
}

/// Composition over borrowed checkers; used to overlay per-request
/// checkers (declared attributes, the caller's own) onto the standard
/// ones without taking ownership.
pub(crate) struct ChainChecker<'a>(pub(crate) Vec<&'a dyn Checker>);

impl Checker for ChainChecker<'_> {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        check_each(self.0.iter().copied(), cond, arg)
    }
}

fn check_each<'a>(
    checkers: impl Iterator<Item = &'a dyn Checker>,
    cond: &str,
    arg: &str,
) -> Result<(), Error> {
    for checker in checkers {
        match checker.check(cond, arg) {
            Err(Error::CaveatNotRecognized) => continue,
            result => return result,
        }
    }
    Err(Error::CaveatNotRecognized)
}

/// The standard checker: the context-free conditions every service
/// understands. Context-bound conditions (`declared`,
/// `client-ip-addr`, `allow`/`deny`) need per-request state and are
/// composed in by the caller; `error` deliberately has no checker.
pub fn std() -> MultiChecker {
    MultiChecker::new(vec![Box::new(TimeBefore)])
}

/// Returns a caveat that can never be satisfied, carrying the given
/// message. Caveat constructors return this when their arguments are
/// invalid, so that misuse surfaces at verification time rather than
/// minting a macaroon with a silently missing restriction.
pub fn error_caveat(message: impl std::fmt::Display) -> Caveat {
    Caveat::first_party(format!("{} {}", COND_ERROR, message))
}

/// Returns a caveat satisfied only by requests from the given client
/// address.
pub fn client_ip_addr_caveat(addr: IpAddr) -> Caveat {
    Caveat::first_party(format!("{} {}", COND_CLIENT_IP_ADDR, addr))
}

/// Checks `client-ip-addr` conditions against the peer address of the
/// request being served; the transport layer constructs one per
/// request.
pub struct ClientIpAddrChecker {
    addr: IpAddr,
}

impl ClientIpAddrChecker {
    pub fn new(addr: IpAddr) -> Self {
        ClientIpAddrChecker { addr }
    }
}

impl Checker for ClientIpAddrChecker {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        if cond != COND_CLIENT_IP_ADDR {
            return Err(Error::CaveatNotRecognized);
        }
        let want: IpAddr = arg
            .parse()
            .map_err(|_| Error::ConditionFailed(format!("cannot parse IP address {arg:?}")))?;
        if want == self.addr {
            Ok(())
        } else {
            Err(Error::ConditionFailed(format!(
                "client IP address mismatch, got {}",
                self.addr
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_caveat_splits_on_first_space() {
        assert_eq!(parse_caveat("time-before 2030-01-01T00:00:00Z").unwrap(),
            ("time-before", "2030-01-01T00:00:00Z"));
        assert_eq!(parse_caveat("declared username alice").unwrap(),
            ("declared", "username alice"));
        assert_eq!(parse_caveat("true").unwrap(), ("true", ""));
        assert!(parse_caveat("").is_err());
        assert!(parse_caveat(" leading").is_err());
    }

    #[test]
    fn composition_first_non_unrecognised_wins() {
        let unrecognising = CheckerFunc(|_: &str, _: &str| -> Result<(), Error> {
            Err(Error::CaveatNotRecognized)
        });
        let failing = CheckerFunc(|_: &str, _: &str| -> Result<(), Error> {
            Err(Error::ConditionFailed("failed".to_owned()))
        });
        let passing = CheckerFunc(|_: &str, _: &str| -> Result<(), Error> { Ok(()) });

        let checker = MultiChecker::new(vec![
            Box::new(unrecognising),
            Box::new(failing),
            Box::new(passing),
        ]);
        assert_eq!(
            checker.check("anything", ""),
            Err(Error::ConditionFailed("failed".to_owned()))
        );

        let none = MultiChecker::new(vec![]);
        assert_eq!(none.check("anything", ""), Err(Error::CaveatNotRecognized));
    }

    #[test]
    fn error_caveats_never_pass_the_standard_checker() {
        let cav = error_caveat("cannot format time");
        assert_eq!(cav.condition, "error cannot format time");
        let (cond, arg) = parse_caveat(&cav.condition).unwrap();
        assert_eq!(std().check(cond, arg), Err(Error::CaveatNotRecognized));
    }

    #[test]
    fn client_ip_checker() {
        let checker = ClientIpAddrChecker::new("10.0.0.1".parse().unwrap());
        assert_eq!(checker.check(COND_CLIENT_IP_ADDR, "10.0.0.1"), Ok(()));
        assert!(matches!(
            checker.check(COND_CLIENT_IP_ADDR, "10.0.0.2"),
            Err(Error::ConditionFailed(_))
        ));
        assert!(matches!(
            checker.check(COND_CLIENT_IP_ADDR, "not-an-ip"),
            Err(Error::ConditionFailed(_))
        ));
        assert_eq!(
            checker.check("something-else", ""),
            Err(Error::CaveatNotRecognized)
        );
    }

    #[test]
    fn ip_caveat_form() {
        let cav = client_ip_addr_caveat("2001:db8::1".parse().unwrap());
        assert_eq!(cav.condition, "client-ip-addr 2001:db8::1");
        assert!(cav.is_first_party());
    }
}
