pub mod extract;
pub mod numbers;
pub mod stats;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use self::numbers::parse_plain;
use crate::error::ScrapeError;

static TOTAL_PAGES: LazyLock<Selector> = LazyLock::new(|| sel(".total-pages"));
static TABLE_BODY: LazyLock<Selector> = LazyLock::new(|| sel("tbody"));
static ROW: LazyLock<Selector> = LazyLock::new(|| sel("tr"));
static LEVEL: LazyLock<Selector> = LazyLock::new(|| sel(".long-level"));
static HONOR: LazyLock<Selector> = LazyLock::new(|| sel(".long-ph"));
static CLASS: LazyLock<Selector> = LazyLock::new(|| sel(".long-players"));
static NICK: LazyLock<Selector> = LazyLock::new(|| sel(".long-clan"));
static LAST_ONLINE: LazyLock<Selector> = LazyLock::new(|| sel(".long-last-online"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| sel("a"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// One ladder row as it appears in the markup: raw cell texts, not yet typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LadderRow {
    pub href: Option<String>,
    pub level: Option<String>,
    pub honor: Option<String>,
    pub class: Option<String>,
    pub nick: Option<String>,
    pub last_online: Option<String>,
}

/// A parsed ladder page. `Html` cannot leave the thread that built it, so the
/// parse stage hands this owned snapshot to the extract stage instead.
#[derive(Debug, Clone, PartialEq)]
pub struct LadderDocument {
    pub page: u32,
    pub total_pages: Option<u32>,
    pub rows: Vec<LadderRow>,
}

/// Parse a ladder page body. A body without any ladder table is rejected.
pub fn parse_ladder_page(page: u32, body: &str) -> Result<LadderDocument, ScrapeError> {
    if body.trim().is_empty() {
        return Err(ScrapeError::Parse {
            page,
            reason: "empty body".into(),
        });
    }

    let doc = Html::parse_document(body);
    let mut tables = doc.select(&TABLE_BODY).peekable();
    if tables.peek().is_none() {
        return Err(ScrapeError::Parse {
            page,
            reason: "no ladder table".into(),
        });
    }

    let rows = tables
        .flat_map(|table| table.select(&ROW))
        .map(read_row)
        .collect();

    Ok(LadderDocument {
        page,
        total_pages: total_pages(&doc),
        rows,
    })
}

fn total_pages(doc: &Html) -> Option<u32> {
    let el = doc.select(&TOTAL_PAGES).next()?;
    parse_plain(&text_of(el))
        .ok()
        .and_then(|n| u32::try_from(n).ok())
}

fn read_row(row: ElementRef<'_>) -> LadderRow {
    let first = |s: &Selector| row.select(s).next().map(text_of);
    LadderRow {
        href: row
            .select(&ANCHOR)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string),
        level: first(&LEVEL),
        honor: first(&HONOR),
        class: first(&CLASS),
        nick: first(&NICK),
        last_online: first(&LAST_ONLINE),
    }
}

/// Concatenated text of an element, trimmed.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}
