//! operation caveats
//!
//! `allow` and `deny` caveats restrict which operations a macaroon may
//! authorize. The service composes an [OperationChecker] naming the
//! operation currently being attempted.

use super::{error_caveat, Caveat, Checker, COND_ALLOW, COND_DENY};
use crate::error::Error;

/// Checks `allow` and `deny` conditions against the operation being
/// performed.
pub struct OperationChecker(pub String);

impl Checker for OperationChecker {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        let allow = match cond {
            COND_ALLOW => true,
            COND_DENY => false,
            _ => return Err(Error::CaveatNotRecognized),
        };
        let mut named = arg.split(' ').filter(|op| !op.is_empty()).peekable();
        if named.peek().is_none() {
            return Err(Error::ConditionFailed(format!("no operations in {cond} caveat")));
        }
        let matched = named.any(|op| op == self.0);
        if matched == allow {
            Ok(())
        } else {
            Err(Error::ConditionFailed(format!(
                "operation {:?} not permitted",
                self.0
            )))
        }
    }
}

/// Returns a caveat permitting exactly the named operations.
pub fn allow_caveat(ops: &[&str]) -> Caveat {
    operation_caveat(COND_ALLOW, ops)
}

/// Returns a caveat forbidding the named operations.
pub fn deny_caveat(ops: &[&str]) -> Caveat {
    operation_caveat(COND_DENY, ops)
}

fn operation_caveat(cond: &str, ops: &[&str]) -> Caveat {
    if ops.is_empty() {
        return error_caveat(format!("no operations in {cond} caveat"));
    }
    if let Some(bad) = ops.iter().find(|op| op.is_empty() || op.contains(' ')) {
        return error_caveat(format!("invalid operation name {bad:?}"));
    }
    Caveat::first_party(format!("{} {}", cond, ops.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_matches_the_current_operation() {
        let read = OperationChecker("read".to_owned());
        assert_eq!(read.check(COND_ALLOW, "read write"), Ok(()));
        assert!(matches!(
            read.check(COND_ALLOW, "write delete"),
            Err(Error::ConditionFailed(_))
        ));
    }

    #[test]
    fn deny_excludes_the_current_operation() {
        let read = OperationChecker("read".to_owned());
        assert!(matches!(
            read.check(COND_DENY, "read write"),
            Err(Error::ConditionFailed(_))
        ));
        assert_eq!(read.check(COND_DENY, "write delete"), Ok(()));
    }

    #[test]
    fn empty_operation_sets_fail() {
        let read = OperationChecker("read".to_owned());
        assert!(matches!(
            read.check(COND_ALLOW, ""),
            Err(Error::ConditionFailed(_))
        ));
    }

    #[test]
    fn unrelated_conditions_fall_through() {
        let read = OperationChecker("read".to_owned());
        assert_eq!(
            read.check("time-before", "2030-01-01T00:00:00Z"),
            Err(Error::CaveatNotRecognized)
        );
    }

    #[test]
    fn caveat_constructors_validate() {
        assert_eq!(allow_caveat(&["read", "write"]).condition, "allow read write");
        assert_eq!(deny_caveat(&["delete"]).condition, "deny delete");
        assert!(allow_caveat(&[]).condition.starts_with("error "));
        assert!(deny_caveat(&["bad op"]).condition.starts_with("error "));
    }
}
