//! MySQL charset / collation tables.
//!
//! Only the charsets that show up in proxy deployments are listed; the IDs
//! are the protocol collation IDs MySQL itself assigns. The namespace
//! resolution contract: both fields empty → server defaults, collation
//! empty → the charset's default collation, both set → the collation must
//! belong to the charset.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Protocol collation ID as sent in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollationId(pub u16);

impl std::fmt::Display for CollationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION_ID: CollationId = CollationId(45); // utf8mb4_general_ci

/// (charset, default collation id)
const CHARSETS: &[(&str, u16)] = &[
    ("big5", 1),
    ("latin1", 8),
    ("ascii", 11),
    ("gb2312", 24),
    ("gbk", 28),
    ("utf8", 33),
    ("utf8mb4", 45),
    ("binary", 63),
];

/// (collation name, owning charset, id)
const COLLATIONS: &[(&str, &str, u16)] = &[
    ("big5_chinese_ci", "big5", 1),
    ("latin1_swedish_ci", "latin1", 8),
    ("ascii_general_ci", "ascii", 11),
    ("gb2312_chinese_ci", "gb2312", 24),
    ("gbk_chinese_ci", "gbk", 28),
    ("utf8_general_ci", "utf8", 33),
    ("utf8mb4_general_ci", "utf8mb4", 45),
    ("latin1_bin", "latin1", 47),
    ("binary", "binary", 63),
    ("utf8_bin", "utf8", 83),
    ("gbk_bin", "gbk", 87),
    ("utf8mb4_unicode_ci", "utf8mb4", 224),
    ("utf8mb4_bin", "utf8mb4", 46),
];

/// Default collation for a charset.
pub fn default_collation_for(charset: &str) -> Option<CollationId> {
    CHARSETS
        .iter()
        .find(|(name, _)| *name == charset)
        .map(|(_, id)| CollationId(*id))
}

/// Look up a collation by name, returning its ID and owning charset.
pub fn collation_by_name(name: &str) -> Option<(CollationId, &'static str)> {
    COLLATIONS
        .iter()
        .find(|(coll, _, _)| *coll == name)
        .map(|(_, charset, id)| (CollationId(*id), *charset))
}

/// Resolve the configured charset/collation pair to the effective values.
pub fn resolve(charset: &str, collation: &str) -> Result<(String, CollationId), ConfigError> {
    if charset.is_empty() && collation.is_empty() {
        return Ok((DEFAULT_CHARSET.to_string(), DEFAULT_COLLATION_ID));
    }

    if collation.is_empty() {
        let id = default_collation_for(charset)
            .ok_or_else(|| ConfigError::InvalidCharset(charset.to_string()))?;
        return Ok((charset.to_string(), id));
    }

    let (id, owner) = collation_by_name(collation)
        .ok_or_else(|| ConfigError::InvalidCollation(collation.to_string()))?;
    if !charset.is_empty() && owner != charset {
        return Err(ConfigError::CharsetMismatch {
            charset: charset.to_string(),
            collation: collation.to_string(),
        });
    }
    Ok((owner.to_string(), id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_empty_gives_defaults() {
        let (charset, id) = resolve("", "").unwrap();
        assert_eq!(charset, "utf8mb4");
        assert_eq!(id, DEFAULT_COLLATION_ID);
    }

    #[test]
    fn test_collation_derived_from_charset() {
        let (charset, id) = resolve("gbk", "").unwrap();
        assert_eq!(charset, "gbk");
        assert_eq!(id, CollationId(28));
    }

    #[test]
    fn test_matching_pair_accepted() {
        let (charset, id) = resolve("utf8mb4", "utf8mb4_bin").unwrap();
        assert_eq!(charset, "utf8mb4");
        assert_eq!(id, CollationId(46));
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let err = resolve("latin1", "utf8mb4_bin").unwrap_err();
        assert!(matches!(err, ConfigError::CharsetMismatch { .. }));
    }

    #[test]
    fn test_unknown_charset_rejected() {
        assert!(matches!(
            resolve("klingon", "").unwrap_err(),
            ConfigError::InvalidCharset(_)
        ));
    }

    #[test]
    fn test_unknown_collation_rejected() {
        assert!(matches!(
            resolve("utf8", "utf8_klingon_ci").unwrap_err(),
            ConfigError::InvalidCollation(_)
        ));
    }

    #[test]
    fn test_collation_only_infers_charset() {
        let (charset, id) = resolve("", "utf8_bin").unwrap();
        assert_eq!(charset, "utf8");
        assert_eq!(id, CollationId(83));
    }
}
