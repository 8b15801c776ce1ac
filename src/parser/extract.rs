use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::numbers::parse_plain;
use super::LadderRow;
use crate::error::ScrapeError;
use crate::model::{CharacterClass, LadderEntry, LevelSnapshot, Record, RunContext, ScrapMode};

static PROFILE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/profile/view,(\d+)#char_(\d+)").unwrap());

/// Records for one ladder row. Rows without a usable identity yield nothing,
/// in either mode.
pub fn extract_row(ctx: &RunContext, row: &LadderRow) -> Result<Vec<Record>, ScrapeError> {
    let href = row.href.as_deref().unwrap_or("");
    let (profile_id, character_id) = parse_identity(href)?;
    let level = row.level.as_deref().map(level_field);

    let snapshot = LevelSnapshot {
        captured_at: ctx.captured_at,
        world: ctx.world.clone(),
        character_id,
        level: level.as_ref().and_then(|l| l.as_ref().ok().copied()),
    };

    match ctx.mode {
        ScrapMode::Level => Ok(vec![Record::Level(snapshot)]),
        ScrapMode::Full => {
            let entry = LadderEntry {
                captured_at: ctx.captured_at,
                world: ctx.world.clone(),
                profile_id,
                character_id,
                nick: text(&row.nick),
                level: best_effort(character_id, level),
                class: CharacterClass::from_label(&text(&row.class)),
                honor: best_effort(
                    character_id,
                    row.honor.as_deref().map(|t| int_field("honor", t)),
                ),
                last_online: text(&row.last_online),
            };
            Ok(vec![Record::Entry(entry), Record::Level(snapshot)])
        }
    }
}

/// Profile and character id from a link like `/profile/view,42#char_7`.
/// Both ids are required; anything after the character id is ignored.
pub fn parse_identity(href: &str) -> Result<(i64, i64), ScrapeError> {
    let caps = PROFILE_LINK_RE
        .captures(href.trim())
        .ok_or_else(|| ScrapeError::IdentityExtraction(href.to_string()))?;
    let profile = caps[1]
        .parse()
        .map_err(|_| ScrapeError::IdentityExtraction(href.to_string()))?;
    let character = caps[2]
        .parse()
        .map_err(|_| ScrapeError::IdentityExtraction(href.to_string()))?;
    Ok((profile, character))
}

fn int_field(field: &'static str, text: &str) -> Result<i64, ScrapeError> {
    parse_plain(text.trim()).map_err(|_| ScrapeError::FieldExtraction {
        field,
        text: text.to_string(),
    })
}

fn level_field(text: &str) -> Result<i64, ScrapeError> {
    match int_field("level", text)? {
        level if level < 0 => Err(ScrapeError::FieldExtraction {
            field: "level",
            text: text.to_string(),
        }),
        level => Ok(level),
    }
}

// Missing or unparsable numeric cells fall back to zero.
fn best_effort(character_id: i64, value: Option<Result<i64, ScrapeError>>) -> i64 {
    match value {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            debug!("character {}: {}", character_id, e);
            0
        }
        None => 0,
    }
}

fn text(cell: &Option<String>) -> String {
    cell.as_deref().map(str::trim).unwrap_or("").to_string()
}
