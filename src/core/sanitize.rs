use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_STEM_CHARS: usize = 100;
pub const DOCUMENT_EXTENSION: &str = "pdf";

static RESERVED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SEPARATOR_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__+").unwrap());

pub fn fallback_name(page: u32, index: usize) -> String {
    format!("cv_p{page}_{index}")
}

fn normalize(raw: &str) -> String {
    let replaced = RESERVED_RE.replace_all(raw.trim(), "_");
    let replaced = WHITESPACE_RE.replace_all(&replaced, "_");
    let collapsed = SEPARATOR_RUN_RE.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

fn truncate(stem: &str) -> String {
    let truncated: String = stem.chars().take(MAX_STEM_CHARS).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Builds the staging file name for a CV: `<stem>_p<page>.pdf`, the stem
/// capped at [`MAX_STEM_CHARS`] characters.
/// An already sanitized name for the same page maps to itself.
pub fn sanitize_file_name(raw_name: Option<&str>, page: u32, index: usize) -> String {
    let suffix = format!("_p{page}");
    let tail = format!("{suffix}.{DOCUMENT_EXTENSION}");

    let normalized = raw_name.map(normalize).unwrap_or_default();
    let base = normalized.strip_suffix(&tail).unwrap_or(&normalized);

    let mut stem = truncate(base);
    if stem.is_empty() {
        stem = fallback_name(page, index);
    }

    format!("{stem}{tail}")
}
