//! Classification codes - normalization and cost schedule matching.

mod code;
mod matching;

pub use code::{normalize, NormalizedCode};
pub use matching::{find_match, MatchMethod, MatchResult};

pub(crate) use code::simplify;
