use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a ladder run extracts from each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScrapMode {
    /// Full character state (upserted) plus a level snapshot per row.
    Full,
    /// Level snapshots only.
    Level,
}

impl std::fmt::Display for ScrapMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapMode::Full => f.write_str("full"),
            ScrapMode::Level => f.write_str("level"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CharacterClass {
    Tracker,
    Hunter,
    BladeDancer,
    Warrior,
    Paladin,
    Mage,
}

const CLASS_LABELS: &[(&str, CharacterClass)] = &[
    ("Tropiciel", CharacterClass::Tracker),
    ("Łowca", CharacterClass::Hunter),
    ("Tancerz ostrzy", CharacterClass::BladeDancer),
    ("Wojownik", CharacterClass::Warrior),
    ("Paladyn", CharacterClass::Paladin),
    ("Mag", CharacterClass::Mage),
];

impl CharacterClass {
    /// Looks up the localized label shown on the ladder.
    pub fn from_label(label: &str) -> Option<Self> {
        CLASS_LABELS
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, class)| *class)
    }

    pub fn from_code(code: &str) -> Option<Self> {
        [
            CharacterClass::Tracker,
            CharacterClass::Hunter,
            CharacterClass::BladeDancer,
            CharacterClass::Warrior,
            CharacterClass::Paladin,
            CharacterClass::Mage,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }

    /// Single-letter storage code.
    pub fn code(self) -> &'static str {
        match self {
            CharacterClass::Tracker => "t",
            CharacterClass::Hunter => "h",
            CharacterClass::BladeDancer => "b",
            CharacterClass::Warrior => "w",
            CharacterClass::Paladin => "p",
            CharacterClass::Mage => "m",
        }
    }
}

/// Latest known state of one character, keyed by (world, character_id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LadderEntry {
    pub captured_at: DateTime<Utc>,
    pub world: String,
    pub profile_id: i64,
    pub character_id: i64,
    pub nick: String,
    pub level: i64,
    pub class: Option<CharacterClass>,
    pub honor: i64,
    pub last_online: String,
}

/// One sighting of a character; never merged with earlier sightings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSnapshot {
    pub captured_at: DateTime<Utc>,
    pub world: String,
    pub character_id: i64,
    pub level: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Entry(LadderEntry),
    Level(LevelSnapshot),
}

/// Fixed for the duration of one run and shared by every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub world: String,
    pub mode: ScrapMode,
    pub captured_at: DateTime<Utc>,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneralStats {
    pub online: i64,
    pub max_online: i64,
    pub players: i64,
    pub characters: i64,
    pub players_24h: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub world: String,
    pub total_characters: i64,
    pub load_1min: i64,
    pub load_5min: i64,
    pub online: i64,
    pub max_online: i64,
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterActivity {
    pub world: String,
    pub nick: String,
}
