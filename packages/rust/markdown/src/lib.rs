//! HTML-to-text conversion for rendered documentation pages.
//!
//! Converts a styled HTML page produced by the documentation build tool into
//! plain Markdown text using the `htmd` crate, then applies a series of cleanup
//! passes that drop theme chrome, permalink markers and intra-site links.

mod cleanup;

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::{debug, instrument};

use contextmaker_shared::{ContextMakerError, Result};

/// Tags dropped wholesale during conversion.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "iframe", "noscript", "svg", "header", "footer", "form",
];

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert one rendered HTML page to clean text.
///
/// 1. Extracts the content region (theme sidebars and navigation dropped)
/// 2. Pre-processes HTML tables into markdown tables
/// 3. Converts HTML → Markdown via `htmd`
/// 4. Runs the cleanup pipeline
#[instrument(skip(html), fields(len = html.len()))]
pub fn html_to_text(html: &str) -> Result<String> {
    let content_html = extract_content_html(html);
    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| ContextMakerError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let text = cleanup::run_pipeline(&raw_markdown);
    debug!(final_len = text.len(), "conversion complete");
    Ok(text)
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Convert HTML `<table>` elements to markdown table syntax before htmd conversion.
///
/// `htmd` 0.1 doesn't support table conversion, so we handle it manually.
fn preprocess_tables(html: &str) -> String {
    static TABLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("table").expect("valid selector"));

    let doc = Html::parse_fragment(html);
    if doc.select(&TABLE_SEL).next().is_none() {
        return html.to_string();
    }

    let mut result = html.to_string();
    for table_el in doc.select(&TABLE_SEL) {
        let table_html = table_el.html();
        let md_table = html_table_to_markdown(&table_el);
        result = result.replacen(&table_html, &md_table, 1);
    }

    result
}

/// Convert a single HTML table element to a markdown table string.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    static TR_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
    static TH_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("th").expect("valid selector"));
    static TD_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("td").expect("valid selector"));

    let cell_text = |cell: scraper::ElementRef| {
        cell.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .replace('|', "\\|")
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&TR_SEL) {
        let ths: Vec<String> = tr.select(&TH_SEL).map(cell_text).collect();
        if !ths.is_empty() {
            has_header = true;
            rows.push(ths);
            continue;
        }

        let tds: Vec<String> = tr.select(&TD_SEL).map(cell_text).collect();
        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let mut md = String::from("\n\n");

    md.push_str("| ");
    md.push_str(&rows[0].join(" | "));
    md.push_str(" |\n");

    md.push_str("| ");
    md.push_str(&vec!["---"; col_count].join(" | "));
    md.push_str(" |\n");

    let data_start = if has_header { 1 } else { 0 };
    for row in &rows[data_start..] {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
    }

    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the main content HTML, stripping theme chrome (sidebars, nav, footer).
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    // Known content containers, most specific first
    let selectors = [
        "div[itemprop=\"articleBody\"]", // sphinx_rtd_theme
        "article.bd-article",            // pydata / furo-like themes
        "div.body[role=\"main\"]",       // alabaster / classic
        "[role=\"main\"]",
        "div.body",
        "article",
        "main",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    html.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
