use std::fmt;
use std::time::Duration;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

/// UTC timestamp stored as a fixed-width ISO-8601 string
/// (`YYYY-MM-DDTHH:MM:SS.ffffffZ`).
///
/// Every value has the same width, so comparing the strings (and their
/// bincode encoding, which is length-prefixed) orders them chronologically.
/// That lets the due-index and the retention sweep work on raw keys without
/// parsing dates.
#[derive(
    Debug, Encode, Decode, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct IsoTimestamp(String);

impl IsoTimestamp {
    pub fn now() -> Self {
        Self::from(OffsetDateTime::now_utc())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_offset_date_time(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.0, &Rfc3339).ok()
    }

    /// Time left until `self`, or zero if it already passed.
    pub fn saturating_duration_since(&self, now: OffsetDateTime) -> Duration {
        self.to_offset_date_time()
            .map(|t| (t - now).try_into().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO)
    }
}

impl From<OffsetDateTime> for IsoTimestamp {
    fn from(dt: OffsetDateTime) -> Self {
        let dt = dt.to_offset(UtcOffset::UTC);
        Self(format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}Z",
            dt.year(),
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.microsecond()
        ))
    }
}

impl fmt::Display for IsoTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
