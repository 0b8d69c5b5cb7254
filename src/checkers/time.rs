//! time-based caveats

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{error_caveat, parse_caveat, Caveat, Checker, COND_TIME_BEFORE};
use crate::error::Error;
use crate::macaroon;

/// Checks `time-before` conditions against the wall clock.
pub struct TimeBefore;

impl Checker for TimeBefore {
    fn check(&self, cond: &str, arg: &str) -> Result<(), Error> {
        if cond != COND_TIME_BEFORE {
            return Err(Error::CaveatNotRecognized);
        }
        let deadline = OffsetDateTime::parse(arg, &Rfc3339)
            .map_err(|e| Error::ConditionFailed(format!("cannot parse time {arg:?}: {e}")))?;
        if OffsetDateTime::now_utc() < deadline {
            Ok(())
        } else {
            Err(Error::ConditionFailed("macaroon has expired".to_owned()))
        }
    }
}

/// Returns a caveat satisfied only before the given time.
pub fn time_before_caveat(deadline: OffsetDateTime) -> Caveat {
    match deadline.format(&Rfc3339) {
        Ok(formatted) => Caveat::first_party(format!("{} {}", COND_TIME_BEFORE, formatted)),
        Err(e) => error_caveat(format!("cannot format deadline: {e}")),
    }
}

/// Returns the earliest `time-before` deadline among the first-party
/// caveats, the natural expiry hint for the macaroon's stored root key.
pub fn expiry_time(caveats: &[macaroon::Caveat]) -> Option<OffsetDateTime> {
    let mut earliest: Option<OffsetDateTime> = None;
    for caveat in caveats {
        if caveat.is_third_party() {
            continue;
        }
        let Ok(condition) = std::str::from_utf8(caveat.id()) else {
            continue;
        };
        let Ok((cond, arg)) = parse_caveat(condition) else {
            continue;
        };
        if cond != COND_TIME_BEFORE {
            continue;
        }
        let Ok(deadline) = OffsetDateTime::parse(arg, &Rfc3339) else {
            continue;
        };
        earliest = Some(match earliest {
            Some(current) if current <= deadline => current,
            _ => deadline,
        });
    }
    earliest
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::macaroon::Macaroon;

    #[test]
    fn future_deadline_passes() {
        assert_eq!(
            TimeBefore.check(COND_TIME_BEFORE, "9999-01-01T00:00:00Z"),
            Ok(())
        );
    }

    #[test]
    fn past_deadline_fails() {
        assert_eq!(
            TimeBefore.check(COND_TIME_BEFORE, "2000-01-01T00:00:00Z"),
            Err(Error::ConditionFailed("macaroon has expired".to_owned()))
        );
    }

    #[test]
    fn unparseable_deadline_fails() {
        assert!(matches!(
            TimeBefore.check(COND_TIME_BEFORE, "next tuesday"),
            Err(Error::ConditionFailed(_))
        ));
    }

    #[test]
    fn other_conditions_are_not_recognised() {
        assert_eq!(
            TimeBefore.check("declared", "x y"),
            Err(Error::CaveatNotRecognized)
        );
    }

    #[test]
    fn caveat_uses_rfc3339() {
        let cav = time_before_caveat(datetime!(2030-01-02 03:04:05 UTC));
        assert_eq!(cav.condition, "time-before 2030-01-02T03:04:05Z");
    }

    #[test]
    fn earliest_deadline_wins() {
        let mut m = Macaroon::new(b"key", b"id".to_vec(), "");
        m.add_first_party_caveat("time-before 2031-01-01T00:00:00Z");
        m.add_first_party_caveat("declared username alice");
        m.add_first_party_caveat("time-before 2030-01-01T00:00:00Z");

        assert_eq!(
            expiry_time(m.caveats()),
            Some(datetime!(2030-01-01 00:00:00 UTC))
        );
    }

    #[test]
    fn no_deadline_no_expiry() {
        let mut m = Macaroon::new(b"key", b"id".to_vec(), "");
        m.add_first_party_caveat("declared username alice");
        assert_eq!(expiry_time(m.caveats()), None);
    }
}
