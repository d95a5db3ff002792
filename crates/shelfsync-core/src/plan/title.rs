//! Title normalization for item filenames.
//!
//! Item files are named `<credit> - <title>.<ext>`. Over time the same song
//! has been stored under several credits (`Queen, David Bowie - Under
//! Pressure.pdf` vs `Queen - Under Pressure.pdf`). Within one artist's
//! collection the canonical name credits only that artist.

use crate::matching::normalize_text;
use regex::Regex;
use std::sync::LazyLock;

/// Separators between performers in a credit.
static CREDIT_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:,|&|/|\band\b|\bfeat\.?|\bft\.?|\bfeaturing\b|\bwith\b|\bx\b)\s*").unwrap()
});

/// A credit that continues after the collection artist's name.
static CREDIT_CONTINUES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:,|&|/|and\b|feat\.?|ft\.?|featuring\b|with\b|x\b)").unwrap()
});

/// Trailing `(feat. X)` / `[ft. X]` in a title.
static FEATURING_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[\(\[]\s*(?:feat\.?|ft\.?|featuring)\s+([^\)\]]+)[\)\]]\s*$").unwrap()
});

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => (&filename[..idx], &filename[idx..]),
        _ => (filename, ""),
    }
}

/// True when `credit` is a multi-performer credit that includes `artist`.
fn credit_includes_artist(credit: &str, artist: &str) -> bool {
    let artist_norm = normalize_text(artist);
    if artist_norm.is_empty() || normalize_text(credit) == artist_norm {
        return false;
    }

    let credit_lower = credit.to_lowercase();
    let artist_lower = artist.to_lowercase();
    if let Some(rest) = credit_lower.strip_prefix(&artist_lower) {
        if CREDIT_CONTINUES.is_match(rest) {
            return true;
        }
    }

    let parts: Vec<&str> = CREDIT_SEPARATOR
        .split(credit)
        .filter(|p| !p.trim().is_empty())
        .collect();
    parts.len() > 1 && parts.iter().any(|p| normalize_text(p) == artist_norm)
}

/// Canonical filename of `filename` within a collection by `artist`.
///
/// Returns the input unchanged when no rule applies.
///
/// ```
/// use shelfsync_core::plan::normalize_title;
///
/// assert_eq!(
///     normalize_title("Queen, David Bowie - Under Pressure.pdf", "Queen"),
///     "Queen - Under Pressure.pdf"
/// );
/// assert_eq!(
///     normalize_title("Elton John - Your Song.pdf", "Queen"),
///     "Elton John - Your Song.pdf"
/// );
/// ```
pub fn normalize_title(filename: &str, artist: &str) -> String {
    let (stem, ext) = split_extension(filename);

    let (credit, title) = match stem.split_once(" - ") {
        Some((credit, title)) => (Some(credit.trim()), title.trim()),
        None => (None, stem.trim()),
    };

    let credit = match credit {
        Some(c) if credit_includes_artist(c, artist) => Some(artist.trim()),
        Some(c) if normalize_text(c) == normalize_text(artist) => Some(c),
        // Someone else's song; leave it alone.
        Some(_) => return filename.to_string(),
        None => None,
    };

    let title = match FEATURING_SUFFIX.captures(title) {
        Some(caps) if normalize_text(&caps[1]) != normalize_text(artist) => {
            FEATURING_SUFFIX.replace(title, "").trim().to_string()
        }
        _ => title.to_string(),
    };
    if title.is_empty() {
        return filename.to_string();
    }

    match credit {
        Some(credit) => format!("{} - {}{}", credit, title, ext),
        None => format!("{}{}", title, ext),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_multi_performer_credit() {
        assert_eq!(
            normalize_title("David Bowie & Queen - Under Pressure.pdf", "Queen"),
            "Queen - Under Pressure.pdf"
        );
        assert_eq!(
            normalize_title("Queen feat. David Bowie - Under Pressure.pdf", "Queen"),
            "Queen - Under Pressure.pdf"
        );
    }

    #[test]
    fn test_artist_names_containing_separators() {
        assert_eq!(
            normalize_title("Simon & Garfunkel - The Boxer.pdf", "Simon & Garfunkel"),
            "Simon & Garfunkel - The Boxer.pdf"
        );
        assert_eq!(
            normalize_title("Simon & Garfunkel, Paul Simon - The Boxer.pdf", "Simon & Garfunkel"),
            "Simon & Garfunkel - The Boxer.pdf"
        );
    }

    #[test]
    fn test_strips_featuring_suffix() {
        assert_eq!(
            normalize_title("Queen - Under Pressure (feat. David Bowie).pdf", "Queen"),
            "Queen - Under Pressure.pdf"
        );
        assert_eq!(
            normalize_title("Under Pressure [ft. David Bowie].pdf", "Queen"),
            "Under Pressure.pdf"
        );
    }

    #[test]
    fn test_leaves_plain_names_alone() {
        assert_eq!(normalize_title("Queen - Innuendo.pdf", "Queen"), "Queen - Innuendo.pdf");
        assert_eq!(normalize_title("Innuendo.pdf", "Queen"), "Innuendo.pdf");
        assert_eq!(normalize_title("README", "Queen"), "README");
    }
}
