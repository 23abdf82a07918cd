//! Classification code canonicalization.
//!
//! Producers and spreadsheet uploads spell the same EBKP code in many ways
//! (`c 02.1`, `C2.01`, `C02.1 `). Everything inside the relay is keyed by the
//! normalized form only.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static DOTTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z])([0-9]+(?:\.[0-9]+)+)$").expect("valid dotted code pattern"));
static BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z])([0-9]+)$").expect("valid bare code pattern"));
static MISSING_MAJOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z])\.([0-9]+)$").expect("valid malformed code pattern"));
static MAJOR_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][0-9]+").expect("valid major segment pattern"));

/// Canonicalizes a raw classification code.
///
/// Steps run in order, each on the previous output:
/// 1. trim and upper-case
/// 2. strip all whitespace
/// 3. `<letter><digits>(.<digits>)+` loses leading zeros per group
/// 4. bare `<letter><digits>` loses leading zeros
/// 5. `<letter>.<digits>` (missing major segment) becomes `<letter><int>`
///
/// Never fails; input that fits no pattern is returned after steps 1-2.
/// The function is idempotent.
pub fn normalize(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let compact: String = upper.chars().filter(|c| !c.is_whitespace()).collect();

    let collapsed = match DOTTED.captures(&compact) {
        Some(caps) => {
            let groups: Vec<&str> = caps[2].split('.').map(strip_leading_zeros).collect();
            format!("{}{}", &caps[1], groups.join("."))
        }
        None => compact,
    };

    let collapsed = match BARE.captures(&collapsed) {
        Some(caps) => format!("{}{}", &caps[1], strip_leading_zeros(&caps[2])),
        None => collapsed,
    };

    match MISSING_MAJOR.captures(&collapsed) {
        Some(caps) => format!("{}{}", &caps[1], strip_leading_zeros(&caps[2])),
        None => collapsed,
    }
}

fn strip_leading_zeros(digits: &str) -> &str {
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        "0"
    } else {
        stripped
    }
}

/// A classification code in canonical form.
///
/// The only key type used by the stores, the match engine and the cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedCode(String);

impl NormalizedCode {
    /// Normalizes a raw code. Returns `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The code with every non-alphanumeric character removed.
    pub fn simplified(&self) -> String {
        simplify(&self.0)
    }

    /// Leading `<letter><digits>` run, e.g. `C2` for `C2.1`.
    pub fn major_segment(&self) -> Option<&str> {
        MAJOR_SEGMENT.find(&self.0).map(|m| m.as_str())
    }
}

impl fmt::Display for NormalizedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn simplify(code: &str) -> String {
    code.chars().filter(|c| c.is_alphanumeric()).collect()
}
