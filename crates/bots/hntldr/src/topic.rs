use std::fmt;
use std::str::FromStr;

use snafu::Snafu;

/// Category of an HN item, used to pick its score threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ShowHn,
    AskHn,
    LaunchHn,
    TellHn,
    Jobs,
    Default,
}

impl Topic {
    pub fn detect(title: &str, item_type: &str) -> Self {
        if item_type == "job" {
            return Topic::Jobs;
        }

        let title = title.trim().to_lowercase();
        for (prefix, topic) in [
            ("show hn:", Topic::ShowHn),
            ("ask hn:", Topic::AskHn),
            ("launch hn:", Topic::LaunchHn),
            ("tell hn:", Topic::TellHn),
        ] {
            if title.starts_with(prefix) {
                return topic;
            }
        }
        Topic::Default
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ShowHn => "show_hn",
            Topic::AskHn => "ask_hn",
            Topic::LaunchHn => "launch_hn",
            Topic::TellHn => "tell_hn",
            Topic::Jobs => "jobs",
            Topic::Default => "default",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum score for a topic, or [`ScoreThreshold::Disabled`] to never
/// publish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreThreshold {
    Disabled,
    Min(u32),
}

impl ScoreThreshold {
    pub fn admits(self, score: u32) -> bool {
        match self {
            ScoreThreshold::Disabled => false,
            ScoreThreshold::Min(min) => min <= score,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("Invalid score threshold `{value}`: expected a non-negative integer, -1 or `off`"))]
pub struct ThresholdParseError {
    value: String,
}

impl FromStr for ScoreThreshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "-1" || s.eq_ignore_ascii_case("off") || s.eq_ignore_ascii_case("disabled") {
            return Ok(ScoreThreshold::Disabled);
        }
        s.parse::<u32>()
            .map(ScoreThreshold::Min)
            .map_err(|_| ThresholdParseError {
                value: s.to_owned(),
            })
    }
}

impl fmt::Display for ScoreThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreThreshold::Disabled => f.write_str("off"),
            ScoreThreshold::Min(min) => write!(f, "{min}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreThresholds {
    pub default: ScoreThreshold,
    pub show_hn: ScoreThreshold,
    pub ask_hn: ScoreThreshold,
    pub launch_hn: ScoreThreshold,
    pub tell_hn: ScoreThreshold,
    pub jobs: ScoreThreshold,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            default: ScoreThreshold::Min(100),
            show_hn: ScoreThreshold::Min(50),
            ask_hn: ScoreThreshold::Min(100),
            launch_hn: ScoreThreshold::Min(75),
            tell_hn: ScoreThreshold::Min(100),
            jobs: ScoreThreshold::Disabled,
        }
    }
}

impl ScoreThresholds {
    pub fn for_topic(&self, topic: Topic) -> ScoreThreshold {
        match topic {
            Topic::ShowHn => self.show_hn,
            Topic::AskHn => self.ask_hn,
            Topic::LaunchHn => self.launch_hn,
            Topic::TellHn => self.tell_hn,
            Topic::Jobs => self.jobs,
            Topic::Default => self.default,
        }
    }
}
