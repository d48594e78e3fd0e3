//! Title and slug derivation for posts.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum slug length in characters, disambiguator included.
pub const MAX_SLUG_LEN: usize = 50;

/// Used whenever sanitizing leaves nothing behind.
pub const FALLBACK_SLUG: &str = "post";

/// Title used when the draft has no non-empty line.
pub const FALLBACK_TITLE: &str = "Untitled";

/// Characters of the item id used as the disambiguator.
const DISAMBIGUATOR_LEN: usize = 6;

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static DISALLOWED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z가-힣\-]+").expect("valid regex"));

static HYPHEN_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("valid regex"));

/// First non-empty line of the draft, without leading heading markers.
pub fn extract_title(draft: &str) -> String {
    draft
        .lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

/// Reduce text to `[0-9A-Za-z가-힣-]`. May return an empty string.
pub fn sanitize(text: &str) -> String {
    let dashed = WHITESPACE_RE.replace_all(text.trim(), "-");
    let kept = DISALLOWED_RE.replace_all(&dashed, "");
    let collapsed = HYPHEN_RUN_RE.replace_all(&kept, "-");
    collapsed.trim_matches('-').to_string()
}

/// Deterministic slug for a title and the first item's id.
///
/// The result is `<base>-<disambiguator>`, never empty, at most
/// [`MAX_SLUG_LEN`] characters.
pub fn make_slug(title: &str, first_item_id: Option<&str>) -> String {
    let suffix = first_item_id
        .map(|id| sanitize(&id.chars().take(DISAMBIGUATOR_LEN).collect::<String>()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_SLUG.to_string());

    let budget = MAX_SLUG_LEN - 1 - suffix.chars().count();
    let base: String = sanitize(title).chars().take(budget).collect();
    let base = base.trim_end_matches('-');
    let base = if base.is_empty() { FALLBACK_SLUG } else { base };

    format!("{base}-{suffix}")
}

/// Reduce a file name to `[A-Za-z0-9._-]`, replacing anything else with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
