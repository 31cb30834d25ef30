//! Entry gate.
//!
//! Decides whether "now" falls inside the opening window for an earnings
//! event and whether the signal provider recommends trading it.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::types::{EarningsEvent, RecommendationSignal, ReportTiming};

/// The only label that lets a candidate through.
pub const ACCEPTED_LABEL: &str = "recommend";

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Exchange timezone the window is expressed in.
    pub timezone: Tz,
    /// Exchange-local time the window opens.
    pub window_start: NaiveTime,
    pub window_length: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            window_start: NaiveTime::from_hms_opt(15, 35, 0).unwrap_or_default(),
            window_length: Duration::minutes(40),
        }
    }
}

pub struct EntryGate {
    config: GateConfig,
}

impl EntryGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn timezone(&self) -> Tz {
        self.config.timezone
    }

    /// Session date the window is anchored on: the day before a
    /// before-open report, the report day itself otherwise.
    pub fn base_date(event: &EarningsEvent) -> NaiveDate {
        match event.timing {
            ReportTiming::BeforeOpen => event.report_date - Duration::days(1),
            ReportTiming::AfterClose => event.report_date,
        }
    }

    /// `[start, end)` of the entry window in exchange-local time.
    pub fn window(&self, event: &EarningsEvent) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
        let naive = Self::base_date(event).and_time(self.config.window_start);
        let start = self.config.timezone.from_local_datetime(&naive).earliest()?;
        Some((start, start + self.config.window_length))
    }

    /// True iff `now` lies in the half-open entry window.
    pub fn should_evaluate<Z: TimeZone>(&self, event: &EarningsEvent, now: &DateTime<Z>) -> bool {
        let Some((start, end)) = self.window(event) else {
            return false;
        };
        let now = now.with_timezone(&self.config.timezone);
        start <= now && now < end
    }

    /// True iff a signal exists and carries the accepted label.
    pub fn is_recommended(signal: Option<&RecommendationSignal>) -> bool {
        signal.is_some_and(|s| s.label == ACCEPTED_LABEL)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
