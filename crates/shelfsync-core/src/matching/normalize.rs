//! Name normalization for cross-store collection matching.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::config::MatchConfig;
use crate::inventory::CollectionKey;

/// Bracketed noise: `(Remastered)`, `[PDF]`, `{2nd ed}`.
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").unwrap());

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Words too common in collection titles to indicate a correspondence.
const STOP_WORDS: &[&str] = &[
    "the", "and", "of", "vol", "volume", "book", "songbook", "edition", "for", "with", "from",
];

/// Lowercase, strip bracketed noise, fold punctuation to spaces, collapse
/// whitespace.
///
/// ```
/// use shelfsync_core::matching::normalize_text;
///
/// assert_eq!(normalize_text("Simon & Garfunkel"), "simon and garfunkel");
/// assert_eq!(normalize_text("Greatest_Hits (Remastered) [PDF]"), "greatest hits");
/// ```
pub fn normalize_text(raw: &str) -> String {
    let lower = raw.to_lowercase().replace('&', " and ").replace('_', " ");
    let unbracketed = BRACKETED.replace_all(&lower, " ");
    let alnum = NON_ALNUM.replace_all(&unbracketed, " ");
    WHITESPACE.replace_all(alnum.trim(), " ").into_owned()
}

/// Split a collection name of the form `<artist> - <title>` when the leading
/// part names `artist`. Returns the title part.
pub fn strip_artist_prefix<'a>(artist: &str, collection: &'a str) -> Option<&'a str> {
    let (prefix, rest) = collection.split_once(" - ")?;
    let rest = rest.trim();
    if rest.is_empty() || normalize_text(prefix) != normalize_text(artist) {
        return None;
    }
    Some(rest)
}

/// Alphanumeric tokens of a normalized string.
pub fn tokens(normalized: &str) -> BTreeSet<String> {
    normalized
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokens long enough and rare enough to count as evidence of a match.
pub fn significant_words(normalized: &str) -> BTreeSet<String> {
    normalized
        .split(' ')
        .filter(|t| t.len() >= MatchConfig::MIN_SIGNIFICANT_WORD_LEN)
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// A collection key with every derived form the scorer needs.
#[derive(Debug, Clone)]
pub struct NormalizedCollection {
    pub key: CollectionKey,
    pub artist: String,
    /// Collection title without an `<artist> - ` prefix.
    pub title: String,
    /// `"<artist> <title>"`
    pub full: String,
    pub tokens: BTreeSet<String>,
    pub significant: BTreeSet<String>,
    pub item_count: usize,
    /// Named in the `Artist - Collection` form.
    pub canonical: bool,
}

impl NormalizedCollection {
    pub fn new(key: &CollectionKey, item_count: usize) -> Self {
        let stripped = strip_artist_prefix(&key.artist, &key.name);
        let artist = normalize_text(&key.artist);
        let title = normalize_text(stripped.unwrap_or(&key.name));
        let full = if title.is_empty() {
            artist.clone()
        } else {
            format!("{} {}", artist, title)
        };
        Self {
            key: key.clone(),
            tokens: tokens(&full),
            significant: significant_words(&title),
            artist,
            title,
            full,
            item_count,
            canonical: stripped.is_some(),
        }
    }

    /// Normalized `(artist, title)` identity.
    pub fn identity(&self) -> (&str, &str) {
        (&self.artist, &self.title)
    }
}
