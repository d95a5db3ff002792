//! Identity matching between differently-named collections.
//!
//! ```text
//! normalize -> candidate filter -> score_pair -> sort -> greedy claim -> tier
//! ```

mod matcher;
mod normalize;
mod score;
mod tier;

pub use matcher::{match_collections, CollectionMatch, MatchOutcome};
pub use normalize::{normalize_text, significant_words, strip_artist_prefix, NormalizedCollection};
pub use score::{item_count_similarity, score_pair, token_overlap_ratio, PairScore};
pub use tier::MatchTier;
