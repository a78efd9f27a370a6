use chrono::NaiveTime;

use crate::model::Window;

/// House rules of the facility: opening hours, clock-gated service
/// windows, loan limits, group minimums. Fixed at engine construction;
/// every gate decision reads from here.
#[derive(Debug, Clone)]
pub struct FacilityPolicy {
    /// Operating hours. Bookings must fit entirely inside.
    pub hours: Window,
    /// When staff may hand a book copy over.
    pub delivery_window: Window,
    /// When staff may take a returned copy back.
    pub return_window: Window,
    /// Loans starting today must be requested before this time.
    pub same_day_cutoff: NaiveTime,
    /// Longest allowed loan, in whole days between start and end date.
    pub max_loan_days: i64,
    /// Smallest allowed cubicle party, creator included.
    pub min_party_size: usize,
}

fn hm(h: u32, m: u32) -> NaiveTime {
    // Compile-time constants in disguise; inputs are always in range.
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

impl Default for FacilityPolicy {
    fn default() -> Self {
        Self {
            hours: Window::new(hm(8, 0), hm(20, 0)),
            delivery_window: Window::new(hm(10, 0), hm(12, 0)),
            return_window: Window::new(hm(8, 0), hm(10, 0)),
            same_day_cutoff: hm(12, 0),
            max_loan_days: 7,
            min_party_size: 3,
        }
    }
}

fn parse_window(s: &str) -> Option<Window> {
    let (start, end) = s.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    (start < end).then(|| Window::new(start, end))
}

impl FacilityPolicy {
    /// Defaults overridden by `CARREL_*` environment variables.
    /// Window-valued vars use `HH:MM-HH:MM`; malformed values fall
    /// back to the default silently.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hours: std::env::var("CARREL_HOURS")
                .ok()
                .and_then(|s| parse_window(&s))
                .unwrap_or(defaults.hours),
            delivery_window: std::env::var("CARREL_DELIVERY_WINDOW")
                .ok()
                .and_then(|s| parse_window(&s))
                .unwrap_or(defaults.delivery_window),
            return_window: std::env::var("CARREL_RETURN_WINDOW")
                .ok()
                .and_then(|s| parse_window(&s))
                .unwrap_or(defaults.return_window),
            same_day_cutoff: std::env::var("CARREL_SAME_DAY_CUTOFF")
                .ok()
                .and_then(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M").ok())
                .unwrap_or(defaults.same_day_cutoff),
            max_loan_days: std::env::var("CARREL_MAX_LOAN_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_loan_days),
            min_party_size: std::env::var("CARREL_MIN_PARTY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_party_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let p = FacilityPolicy::default();
        assert!(p.hours.contains(&p.delivery_window));
        assert!(p.hours.contains(&p.return_window));
        assert!(p.hours.contains_instant(p.same_day_cutoff));
        assert!(p.max_loan_days > 0);
        assert!(p.min_party_size >= 2);
    }

    #[test]
    fn window_parsing() {
        let w = parse_window("09:30-17:00").unwrap();
        assert_eq!(w.start, hm(9, 30));
        assert_eq!(w.end, hm(17, 0));

        assert!(parse_window("09:30 - 17:00").is_some()); // tolerant of spaces
        assert!(parse_window("17:00-09:00").is_none()); // inverted
        assert!(parse_window("9am-5pm").is_none());
        assert!(parse_window("nonsense").is_none());
    }
}
