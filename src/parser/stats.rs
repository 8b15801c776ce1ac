use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::numbers::{parse_percent, parse_plain, parse_suffixed};
use super::text_of;
use crate::error::InvalidNumber;
use crate::model::{CharacterActivity, GeneralStats, WorldStats};

static SERVER_STAT: LazyLock<Selector> = LazyLock::new(|| sel(".server-stat-value"));
static PUBLIC_WORLDS: LazyLock<Selector> =
    LazyLock::new(|| sel(".public-world-list > .server-stats"));
static PRIVATE_WORLDS: LazyLock<Selector> =
    LazyLock::new(|| sel(".private-world-list > .server-stats"));
static CELL: LazyLock<Selector> = LazyLock::new(|| sel("td"));
static PLAYERS_OVERLAY: LazyLock<Selector> = LazyLock::new(|| sel(".current-players-overlay"));
static NEWS_HEADER: LazyLock<Selector> = LazyLock::new(|| sel(".news-header"));
static NEWS_BODY: LazyLock<Selector> = LazyLock::new(|| sel(".news-body"));

static WORLD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+):").unwrap());
static LEGEND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*Legenda\s*>>").unwrap());

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Server-wide counters, read positionally from `.server-stat-value`.
pub fn general_stats(doc: &Html) -> GeneralStats {
    let mut stats = GeneralStats::default();
    for (i, value) in doc.select(&SERVER_STAT).enumerate() {
        let text = text_of(value);
        match i {
            0 => stats.online = or_zero("online", parse_plain(&text)),
            1 => stats.max_online = or_zero("max_online", parse_plain(&text)),
            2 => stats.players = or_zero("players", parse_suffixed(&text)),
            3 => stats.characters = or_zero("characters", parse_suffixed(&text)),
            4 => stats.players_24h = or_zero("players_24h", parse_plain(&text)),
            _ => {}
        }
    }
    stats
}

/// Every public and private world listed on the worlds page.
pub fn world_stats(doc: &Html) -> Vec<WorldStats> {
    let public = doc.select(&PUBLIC_WORLDS).map(|el| read_world(el, false));
    let private = doc.select(&PRIVATE_WORLDS).map(|el| read_world(el, true));
    public.chain(private).collect()
}

fn read_world(el: ElementRef<'_>, private: bool) -> WorldStats {
    let mut stats = WorldStats {
        world: world_name(el.value().attr("data-name").unwrap_or("")),
        private,
        ..Default::default()
    };
    // Odd cells hold values, even cells their labels.
    for (i, cell) in el.select(&CELL).enumerate() {
        let text = text_of(cell);
        match i {
            1 => stats.total_characters = or_zero("total_characters", parse_suffixed(&text)),
            3 => stats.load_1min = or_zero("load_1min", parse_percent(&text)),
            5 => stats.load_5min = or_zero("load_5min", parse_percent(&text)),
            7 => stats.online = or_zero("online", parse_plain(&text)),
            9 => stats.max_online = or_zero("max_online", parse_plain(&text)),
            _ => {}
        }
    }
    stats
}

// "#telawel" → "Telawel"
fn world_name(raw: &str) -> String {
    let mut chars = raw.chars();
    chars.next();
    chars
        .as_str()
        .split(' ')
        .map(|word| {
            let mut c = word.chars();
            match c.next() {
                Some(first) => first.to_uppercase().chain(c).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Nicknames currently online, per world. The first overlay child is a
/// header, not a world.
pub fn character_activity(doc: &Html) -> Vec<CharacterActivity> {
    let Some(overlay) = doc.select(&PLAYERS_OVERLAY).next() else {
        return Vec::new();
    };

    let mut activity = Vec::new();
    for world_el in overlay.children().filter_map(ElementRef::wrap).skip(1) {
        let header = world_el.select(&NEWS_HEADER).next().map(text_of).unwrap_or_default();
        let Some(world) = WORLD_NAME_RE.captures(&header).map(|c| c[1].trim().to_string()) else {
            debug!("skipping world block without name: {:?}", header);
            continue;
        };

        let body = world_el.select(&NEWS_BODY).next().map(text_of).unwrap_or_default();
        let nicks = LEGEND_RE.replace(&body, "");
        activity.extend(
            nicks
                .split(", ")
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|nick| CharacterActivity {
                    world: world.clone(),
                    nick: nick.to_string(),
                }),
        );
    }
    activity
}

fn or_zero(field: &str, value: Result<i64, InvalidNumber>) -> i64 {
    value.unwrap_or_else(|e| {
        debug!("stats field {}: {}", field, e);
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Html {
        let body = std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap();
        Html::parse_document(&body)
    }

    #[test]
    fn general_stats_by_position() {
        let stats = general_stats(&fixture("stats_main"));
        assert_eq!(
            stats,
            GeneralStats {
                online: 1523,
                max_online: 12345,
                players: 3200,
                characters: 1_250_000,
                players_24h: 8100,
            }
        );
    }

    #[test]
    fn public_and_private_worlds() {
        let worlds = world_stats(&fixture("stats_worlds"));
        assert_eq!(worlds.len(), 2);

        assert_eq!(worlds[0].world, "Telawel");
        assert!(!worlds[0].private);
        assert_eq!(worlds[0].total_characters, 45_600);
        assert_eq!(worlds[0].load_1min, 87);
        assert_eq!(worlds[0].load_5min, 64);
        assert_eq!(worlds[0].online, 312);
        assert_eq!(worlds[0].max_online, 1024);

        assert_eq!(worlds[1].world, "Nerthus");
        assert!(worlds[1].private);
        assert_eq!(worlds[1].total_characters, 950);
    }

    #[test]
    fn active_nicks_per_world() {
        let activity = character_activity(&fixture("stats_worlds"));
        let telawel: Vec<_> = activity
            .iter()
            .filter(|a| a.world == "Telawel")
            .map(|a| a.nick.as_str())
            .collect();
        assert_eq!(telawel, ["Berserk", "Aragorn", "Mała Mi"]);
        assert!(activity.iter().any(|a| a.world == "Nerthus" && a.nick == "Zbyszko"));
        assert!(activity.iter().all(|a| !a.nick.contains("Legenda")));
    }

    #[test]
    fn world_names_are_title_cased() {
        assert_eq!(world_name("#telawel"), "Telawel");
        assert_eq!(world_name("#nowy swiat"), "Nowy Swiat");
        assert_eq!(world_name(""), "");
    }
}
