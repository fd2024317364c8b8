//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = strip_permalinks(&result);
    result = normalize_headings(&result);
    result = clean_blank_lines(&result);
    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = unlink_site_references(&result);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Drop heading permalink markers
// ---------------------------------------------------------------------------

/// Remove the `¶` permalink anchors themes attach to every heading.
fn strip_permalinks(md: &str) -> String {
    static PERMALINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[¶\]\([^)]*\)").expect("valid regex"));

    PERMALINK_RE.replace_all(md, "").replace('¶', "")
}

// ---------------------------------------------------------------------------
// Pass 2: Normalize heading levels
// ---------------------------------------------------------------------------

/// Ensure there's at most one H1 per page; later H1s are demoted to H2.
fn normalize_headings(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

    let mut h1_count = 0;
    let mut in_code_block = false;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        }
        if !in_code_block {
            if let Some(caps) = H_RE.captures(line) {
                if &caps[1] == "#" {
                    h1_count += 1;
                    if h1_count > 1 {
                        lines.push(format!("## {}", &caps[2]));
                        continue;
                    }
                }
            }
        }
        lines.push(line.to_string());
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into exactly 2.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Fix code block language hints
// ---------------------------------------------------------------------------

/// Detect and fix code block language hints from class names.
///
/// Handles patterns like `language-python`, `lang-python`, `highlight-python`.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove stray container tags that survived the conversion, keeping their text.
/// Code blocks are left alone.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|figure|figcaption|details|summary|dl|dt|dd)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    let mut result = String::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            result.push_str(line);
        } else if in_code_block {
            result.push_str(line);
        } else {
            result.push_str(&HTML_TAG_RE.replace_all(line, ""));
        }
        result.push('\n');
    }

    if result.ends_with('\n') {
        result.pop();
    }

    result
}

// ---------------------------------------------------------------------------
// Pass 6: Unlink intra-site references
// ---------------------------------------------------------------------------

/// Replace links to other pages of the same site (and in-page anchors) with
/// their text. Those targets don't exist in a flattened artifact; absolute
/// URLs and images are kept.
fn unlink_site_references(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let whole = &caps[0];
            let text = &caps[1];
            let href = caps[2].trim();

            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            if start > 0 && md.as_bytes()[start - 1] == b'!' {
                return whole.to_string();
            }

            let external = href.starts_with("http://")
                || href.starts_with("https://")
                || href.starts_with("mailto:");
            if external {
                whole.to_string()
            } else {
                text.to_string()
            }
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 7: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 8: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
