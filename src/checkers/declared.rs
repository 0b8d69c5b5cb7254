//! declared-attribute caveats
//!
//! A `declared <name> <value>` caveat binds a contextual fact (user,
//! session) into a macaroon. The service infers the declared attributes
//! of a presented slice with [`infer_declared`] and verifies them with
//! the [`Declared`] checker; a third party can be forced to bind
//! attributes with [`need_declared_caveat`].

use std::collections::HashMap;

use super::{error_caveat, parse_caveat, Caveat, Checker, COND_DECLARED, COND_NEED_DECLARED};
use crate::error::Error;
use crate::macaroon::Macaroon;

/// Checks `declared` conditions against an attribute map, usually the
/// one inferred from the macaroon slice being verified.
pub struct Declared(pub HashMap<String, String>);

impl Checker for Declared {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        if cond != COND_DECLARED {
            return Err(Error::CaveatNotRecognized);
        }
        let (name, value) = arg
            .split_once(' ')
            .ok_or_else(|| Error::ConditionFailed("declared caveat has no value".to_owned()))?;
        match self.0.get(name) {
            Some(declared) if declared == value => Ok(()),
            Some(declared) => Err(Error::ConditionFailed(format!(
                "got {name}={declared:?}, expected {value:?}"
            ))),
            None => Err(Error::ConditionFailed(format!(
                "got {name}=null, expected {value:?}"
            ))),
        }
    }
}

/// Returns a caveat asserting that `name` is declared to hold `value`.
pub fn declared_caveat(name: &str, value: impl Into<String>) -> Caveat {
    if name.is_empty() || name.contains(' ') {
        return error_caveat(format!("invalid caveat 'declared' key {name:?}"));
    }
    Caveat::first_party(format!("{} {} {}", COND_DECLARED, name, value.into()))
}

/// Rewrites a third-party caveat so that its discharge is guaranteed to
/// declare each of the named attributes, explicitly declaring the empty
/// string for any the discharger leaves unbound.
pub fn need_declared_caveat(caveat: Caveat, names: &[&str]) -> Caveat {
    if caveat.location.is_empty() {
        return error_caveat("need-declared caveat is not third-party");
    }
    if names.is_empty() {
        return error_caveat("need-declared caveat with no required attributes");
    }
    if let Some(bad) = names
        .iter()
        .find(|n| n.is_empty() || n.contains(' ') || n.contains(','))
    {
        return error_caveat(format!("invalid need-declared attribute {bad:?}"));
    }
    Caveat::third_party(
        caveat.location,
        format!("{} {} {}", COND_NEED_DECLARED, names.join(","), caveat.condition),
    )
}

/// Infers the declared attributes of a macaroon slice from its
/// first-party `declared` caveats.
///
/// A name declared more than once with disagreeing values infers to the
/// empty string, which no `declared` condition can match; the conflict
/// poisons the attribute rather than letting either declaration win.
pub fn infer_declared(ms: &[Macaroon]) -> HashMap<String, String> {
    let mut declared: HashMap<String, String> = HashMap::new();
    let mut conflicts: Vec<String> = Vec::new();
    for m in ms {
        for caveat in m.caveats() {
            if caveat.is_third_party() {
                continue;
            }
            // conditions that don't parse as declarations are someone
            // else's business
            let Ok(condition) = std::str::from_utf8(caveat.id()) else {
                continue;
            };
            let Ok((cond, arg)) = parse_caveat(condition) else {
                continue;
            };
            if cond != COND_DECLARED {
                continue;
            }
            let Some((name, value)) = arg.split_once(' ') else {
                continue;
            };
            match declared.get(name) {
                Some(existing) if existing != value => conflicts.push(name.to_owned()),
                _ => {
                    declared.insert(name.to_owned(), value.to_owned());
                }
            }
        }
    }
    for name in conflicts {
        declared.insert(name, String::new());
    }
    declared
}
