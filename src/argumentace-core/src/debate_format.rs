//! Debate format definitions and trait.
//!
//! A format decides which speaking roles exist, how long the preparation
//! phase lasts and which role the AI opponent takes in answer to the user.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Which bench a speaker sits on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Bench {
    Government,
    Opposition,
}

/// A speaking role within a structured format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateRole {
    pub name: &'static str,
    pub description: &'static str,
    /// Speaking time in minutes.
    pub speaking_minutes: u32,
    pub bench: Bench,
}

impl DebateRole {
    pub fn speaking_secs(&self) -> u64 {
        u64::from(self.speaking_minutes) * 60
    }
}

/// Trait for defining debate formats.
///
/// Implement this trait to add formats beyond the built-in ones.
pub trait DebateFormat: Send + Sync {
    /// Returns the machine name of this format.
    fn name(&self) -> &str;

    /// Returns the display name for the format.
    fn display_name(&self) -> &str;

    fn description(&self) -> &str;

    /// Preparation time in minutes (zero means no timed preparation).
    fn prep_minutes(&self) -> u32;

    /// Speaking roles in speaking order. Empty for unstructured formats.
    fn roles(&self) -> &[DebateRole] {
        &[]
    }

    /// The role the AI opponent answers with when the user speaks as `user_role`.
    fn opponent_role(&self, _user_role: &str) -> Option<&str> {
        None
    }

    fn role(&self, name: &str) -> Option<&DebateRole> {
        self.roles().iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    fn prep_secs(&self) -> u64 {
        u64::from(self.prep_minutes()) * 60
    }

    /// Whether speeches run against the clock, with protected minutes for
    /// points of information.
    fn timed_speeches(&self) -> bool {
        self.prep_minutes() > 0
    }
}

/// Free-form debate with no roles or time constraints.
#[derive(Debug, Clone, Default)]
pub struct StandardFormat;

impl DebateFormat for StandardFormat {
    fn name(&self) -> &str {
        "standard"
    }

    fn display_name(&self) -> &str {
        "Standard Debate"
    }

    fn description(&self) -> &str {
        "A flexible debate format with no specific roles or time constraints."
    }

    fn prep_minutes(&self) -> u32 {
        0
    }
}

const ASIAN_PARLIAMENTARY_ROLES: [DebateRole; 8] = [
    DebateRole {
        name: "Prime Minister",
        description: "First speaker for the Government. Defines the motion and presents the Government's case.",
        speaking_minutes: 7,
        bench: Bench::Government,
    },
    DebateRole {
        name: "Leader of Opposition",
        description: "First speaker for the Opposition. Rebuts the Prime Minister and presents the Opposition's case.",
        speaking_minutes: 7,
        bench: Bench::Opposition,
    },
    DebateRole {
        name: "Deputy Prime Minister",
        description: "Second speaker for the Government. Rebuts the Leader of Opposition and extends the Government's case.",
        speaking_minutes: 7,
        bench: Bench::Government,
    },
    DebateRole {
        name: "Deputy Leader of Opposition",
        description: "Second speaker for the Opposition. Rebuts the Deputy Prime Minister and extends the Opposition's case.",
        speaking_minutes: 7,
        bench: Bench::Opposition,
    },
    DebateRole {
        name: "Government Whip",
        description: "Third speaker for the Government. Rebuts previous Opposition speakers and summarizes the Government's case.",
        speaking_minutes: 7,
        bench: Bench::Government,
    },
    DebateRole {
        name: "Opposition Whip",
        description: "Third speaker for the Opposition. Rebuts previous Government speakers and summarizes the Opposition's case.",
        speaking_minutes: 7,
        bench: Bench::Opposition,
    },
    DebateRole {
        name: "Opposition Reply",
        description: "Final speech for the Opposition. Summarizes the debate from the Opposition's perspective.",
        speaking_minutes: 4,
        bench: Bench::Opposition,
    },
    DebateRole {
        name: "Government Reply",
        description: "Final speech for the Government. Summarizes the debate from the Government's perspective.",
        speaking_minutes: 4,
        bench: Bench::Government,
    },
];

/// Who answers whom. The cycle wraps from the last reply back to the opening speaker.
const ASIAN_PARLIAMENTARY_ANSWERS: [(&str, &str); 8] = [
    ("Prime Minister", "Leader of Opposition"),
    ("Leader of Opposition", "Deputy Prime Minister"),
    ("Deputy Prime Minister", "Deputy Leader of Opposition"),
    ("Deputy Leader of Opposition", "Government Whip"),
    ("Government Whip", "Opposition Whip"),
    ("Opposition Whip", "Government Reply"),
    ("Government Reply", "Opposition Reply"),
    ("Opposition Reply", "Prime Minister"),
];

/// Asian Parliamentary: eight speeches, three per bench plus replies.
#[derive(Debug, Clone, Default)]
pub struct AsianParliamentaryFormat;

impl DebateFormat for AsianParliamentaryFormat {
    fn name(&self) -> &str {
        "asian-parliamentary"
    }

    fn display_name(&self) -> &str {
        "Asian Parliamentary"
    }

    fn description(&self) -> &str {
        "A formal debate format with 8 speeches, including substantive speeches and reply speeches."
    }

    fn prep_minutes(&self) -> u32 {
        15
    }

    fn roles(&self) -> &[DebateRole] {
        &ASIAN_PARLIAMENTARY_ROLES
    }

    fn opponent_role(&self, user_role: &str) -> Option<&str> {
        ASIAN_PARLIAMENTARY_ANSWERS
            .iter()
            .find(|(role, _)| role.eq_ignore_ascii_case(user_role))
            .map(|(_, answer)| *answer)
    }
}

/// British Parliamentary: four teams, no modelled roles.
#[derive(Debug, Clone, Default)]
pub struct BritishParliamentaryFormat;

impl DebateFormat for BritishParliamentaryFormat {
    fn name(&self) -> &str {
        "british-parliamentary"
    }

    fn display_name(&self) -> &str {
        "British Parliamentary"
    }

    fn description(&self) -> &str {
        "A formal debate format with 8 speeches from 4 teams, commonly used in university competitions."
    }

    fn prep_minutes(&self) -> u32 {
        15
    }
}

/// Serializable handle naming one of the built-in formats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    #[default]
    Standard,
    AsianParliamentary,
    BritishParliamentary,
}

impl FormatKind {
    pub fn format(&self) -> Box<dyn DebateFormat> {
        match self {
            FormatKind::Standard => Box::new(StandardFormat),
            FormatKind::AsianParliamentary => Box::new(AsianParliamentaryFormat),
            FormatKind::BritishParliamentary => Box::new(BritishParliamentaryFormat),
        }
    }

    pub fn all() -> [FormatKind; 3] {
        [
            FormatKind::Standard,
            FormatKind::AsianParliamentary,
            FormatKind::BritishParliamentary,
        ]
    }
}

impl FromStr for FormatKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "standard" => Ok(FormatKind::Standard),
            "asian-parliamentary" | "asian" | "ap" => Ok(FormatKind::AsianParliamentary),
            "british-parliamentary" | "british" | "bp" => Ok(FormatKind::BritishParliamentary),
            _ => Err(ValidationError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.format().name())
    }
}

/// Points of information are only allowed between the end of the first
/// minute and the start of the last minute of a seven-minute speech.
pub const POI_OPENS_AFTER_SECS: u64 = 60;
pub const POI_CLOSES_AFTER_SECS: u64 = 360;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoiWindow {
    ProtectedStart,
    Open,
    ProtectedEnd,
}

impl PoiWindow {
    pub fn is_open(self) -> bool {
        self == PoiWindow::Open
    }
}

pub fn poi_window(speech_elapsed_secs: u64) -> PoiWindow {
    if speech_elapsed_secs < POI_OPENS_AFTER_SECS {
        PoiWindow::ProtectedStart
    } else if speech_elapsed_secs > POI_CLOSES_AFTER_SECS {
        PoiWindow::ProtectedEnd
    } else {
        PoiWindow::Open
    }
}
