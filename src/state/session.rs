// =============================================================================
// Market session bookkeeping — US/Eastern trading calendar
// =============================================================================
//
// Premarket 04:00-09:30, market 09:30-16:00, postmarket 16:00-20:00 ET;
// everything else (including weekends) is closed. DST is handled by
// chrono-tz's US::Eastern conversion, so the 04:00/09:30/16:00/20:00 local
// boundaries stay correct across the spring/fall transitions.
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::US::Eastern;

use crate::types::Session;

/// The session a UTC timestamp falls into, by US/Eastern local time.
pub fn session_for(ts: DateTime<Utc>) -> Session {
    let local = ts.with_timezone(&Eastern);
    use chrono::Weekday::*;
    if matches!(local.weekday(), Sat | Sun) {
        return Session::Closed;
    }
    let minutes_since_midnight = local.hour() * 60 + local.minute();
    match minutes_since_midnight {
        m if (4 * 60..9 * 60 + 30).contains(&m) => Session::Premarket,
        m if (9 * 60 + 30..16 * 60).contains(&m) => Session::Market,
        m if (16 * 60..20 * 60).contains(&m) => Session::Postmarket,
        _ => Session::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn et(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn premarket_boundary() {
        assert_eq!(session_for(et(2026, 6, 15, 4, 0)), Session::Premarket);
        assert_eq!(session_for(et(2026, 6, 15, 9, 29)), Session::Premarket);
    }

    #[test]
    fn market_boundary() {
        assert_eq!(session_for(et(2026, 6, 15, 9, 30)), Session::Market);
        assert_eq!(session_for(et(2026, 6, 15, 15, 59)), Session::Market);
    }

    #[test]
    fn postmarket_boundary() {
        assert_eq!(session_for(et(2026, 6, 15, 16, 0)), Session::Postmarket);
        assert_eq!(session_for(et(2026, 6, 15, 19, 59)), Session::Postmarket);
    }

    #[test]
    fn closed_overnight_and_boundary() {
        assert_eq!(session_for(et(2026, 6, 15, 20, 0)), Session::Closed);
        assert_eq!(session_for(et(2026, 6, 15, 3, 59)), Session::Closed);
    }

    #[test]
    fn weekends_always_closed() {
        // 2026-06-13 is a Saturday.
        assert_eq!(session_for(et(2026, 6, 13, 10, 0)), Session::Closed);
        assert_eq!(session_for(et(2026, 6, 14, 10, 0)), Session::Closed);
    }
}
