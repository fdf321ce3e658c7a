//! Bookmark naming for submitted changes.

use chrono::{DateTime, Datelike, Local};

/// Maximum slug length in characters.
const SLUG_MAX: usize = 50;

/// Fallback slug for descriptions with no alphanumeric content.
const UNTITLED: &str = "untitled";

/// Turn a change description into a bookmark-safe slug: lowercase ASCII
/// alphanumerics with single dashes, at most 50 characters, never empty.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len().min(SLUG_MAX));
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= SLUG_MAX {
            break;
        }
    }
    slug.truncate(SLUG_MAX);
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        UNTITLED.to_string()
    } else {
        slug
    }
}

/// `MM-DD-<slug>` label for a change submitted today.
pub fn date_prefixed_label(description: &str) -> String {
    date_prefixed_label_at(Local::now(), description)
}

/// Deterministic variant for a fixed date.
pub fn date_prefixed_label_at<Tz: chrono::TimeZone>(
    now: DateTime<Tz>,
    description: &str,
) -> String {
    format!(
        "{:02}-{:02}-{}",
        now.month(),
        now.day(),
        slugify(description)
    )
}

/// Strip a `-k` collision suffix (`k >= 2`) if present: `feat-x-3` → `feat-x`.
pub fn base_name(name: &str) -> &str {
    if let Some((base, suffix)) = name.rsplit_once('-')
        && suffix.parse::<u32>().map(|k| k >= 2).unwrap_or(false)
    {
        return base;
    }
    name
}
