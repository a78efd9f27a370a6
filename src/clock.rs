use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Source of "now" for every time-gated decision. The engine never
/// reads the wall clock directly, so tests can sit at any instant
/// they like.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    fn time_of_day(&self) -> NaiveTime {
        self.now().time()
    }
}

/// Wall clock in local time. Gates run on the facility's calendar,
/// not UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Manually driven clock. Frozen until told otherwise.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn at(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}
