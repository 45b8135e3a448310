// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backpressure classification.
//!
//! A backend signals overload with a status code and a recognisable message
//! in the response body. Which messages count is data, not code: a profile
//! lists status codes and byte signatures, and new backends only need a new
//! profile.
//!
//! ```toml
//! [[backpressure_profiles]]
//! name = "mydb"
//! version = 1
//! status_codes = [500, 503]
//!
//! [[backpressure_profiles.signatures]]
//! all_of = ["overloaded"]
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A profile that cannot classify anything sensibly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("backpressure profile name cannot be empty")]
    EmptyName,

    #[error("profile '{profile}' signature {index} has an empty pattern")]
    EmptyPattern { profile: String, index: usize },
}

/// Decides whether a non-success response means "slow down".
pub trait BackpressurePredicate: Send + Sync {
    fn is_backpressure(&self, status: u16, body: &[u8]) -> bool;
}

/// One overload message. Matches when every pattern occurs in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub all_of: Vec<String>,
}

impl Signature {
    fn new(patterns: &[&str]) -> Self {
        Self {
            all_of: patterns.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    pub fn matches(&self, body: &[u8]) -> bool {
        !self.all_of.is_empty() && self.all_of.iter().all(|p| contains(body, p.as_bytes()))
    }
}

/// Versioned list of overload signatures for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureProfile {
    pub name: String,

    #[serde(default = "default_version")]
    pub version: u32,

    /// Statuses that may carry an overload message. Empty means any.
    #[serde(default = "default_status_codes")]
    pub status_codes: Vec<u16>,

    #[serde(default)]
    pub signatures: Vec<Signature>,
}

fn default_version() -> u32 {
    1
}

fn default_status_codes() -> Vec<u16> {
    vec![500]
}

/// Overload messages of cnosdb and the influx family it descends from.
const OVERLOAD_SIGNATURES: &[&[&str]] = &[
    &["engine: cache maximum memory size exceeded"],
    &["write failed: hinted handoff queue not empty"],
    &["write failed: read message type: read tcp", "i/o timeout"],
    &["write failed: engine: cache-max-memory-size exceeded"],
    &["timeout"],
    &["write failed: can not exceed max connections of 500"],
];

impl BackpressureProfile {
    /// Names accepted by [`BackpressureProfile::builtin`].
    pub const BUILTIN: [&'static str; 3] = ["cnosdb", "influx", "none"];

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "cnosdb" => Some(Self::cnosdb()),
            "influx" => Some(Self::influx()),
            "none" => Some(Self::none()),
            _ => None,
        }
    }

    pub fn cnosdb() -> Self {
        Self {
            name: "cnosdb".to_string(),
            version: 1,
            status_codes: vec![500],
            signatures: OVERLOAD_SIGNATURES.iter().map(|s| Signature::new(s)).collect(),
        }
    }

    pub fn influx() -> Self {
        Self {
            name: "influx".to_string(),
            version: 1,
            status_codes: vec![500, 503],
            signatures: OVERLOAD_SIGNATURES.iter().map(|s| Signature::new(s)).collect(),
        }
    }

    /// Never backs off; every failure is fatal.
    pub fn none() -> Self {
        Self {
            name: "none".to_string(),
            version: 1,
            status_codes: Vec::new(),
            signatures: Vec::new(),
        }
    }

    /// Index of the first signature found in `body`.
    pub fn matching_signature(&self, body: &[u8]) -> Option<usize> {
        self.signatures.iter().position(|s| s.matches(body))
    }

    /// Check that every signature has at least one non-empty pattern.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.is_empty() {
            return Err(ProfileError::EmptyName);
        }
        for (index, sig) in self.signatures.iter().enumerate() {
            if sig.all_of.is_empty() || sig.all_of.iter().any(|p| p.is_empty()) {
                return Err(ProfileError::EmptyPattern {
                    profile: self.name.clone(),
                    index,
                });
            }
        }
        Ok(())
    }
}

impl BackpressurePredicate for BackpressureProfile {
    fn is_backpressure(&self, status: u16, body: &[u8]) -> bool {
        if !self.status_codes.is_empty() && !self.status_codes.contains(&status) {
            return false;
        }
        self.matching_signature(body).is_some()
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cnosdb_signatures() {
        let profile = BackpressureProfile::cnosdb();
        for body in [
            &b"engine: cache maximum memory size exceeded"[..],
            b"error: write failed: hinted handoff queue not empty",
            b"write failed: engine: cache-max-memory-size exceeded",
            b"request timeout",
            b"write failed: can not exceed max connections of 500",
        ] {
            assert!(profile.is_backpressure(500, body), "{}", String::from_utf8_lossy(body));
        }
    }

    #[test]
    fn test_two_part_signature_needs_both() {
        let profile = BackpressureProfile::cnosdb();
        let first_only = b"write failed: read message type: read tcp 10.0.0.1:8902";
        assert!(!profile.is_backpressure(500, first_only));
        let both = b"write failed: read message type: read tcp 10.0.0.1:8902: i/o timeout";
        assert!(profile.is_backpressure(500, both));
    }

    #[test]
    fn test_status_gate() {
        let profile = BackpressureProfile::cnosdb();
        assert!(!profile.is_backpressure(400, b"timeout"));
        assert!(!profile.is_backpressure(503, b"timeout"));
        assert!(BackpressureProfile::influx().is_backpressure(503, b"timeout"));
    }

    #[test]
    fn test_unrelated_body_is_not_backpressure() {
        let profile = BackpressureProfile::cnosdb();
        assert!(!profile.is_backpressure(500, b"database not found"));
        assert!(!profile.is_backpressure(500, b""));
    }

    #[test]
    fn test_none_profile() {
        let profile = BackpressureProfile::none();
        assert!(!profile.is_backpressure(500, b"timeout"));
    }

    #[test]
    fn test_matching_signature_index() {
        let profile = BackpressureProfile::cnosdb();
        assert_eq!(profile.matching_signature(b"i/o timeout"), Some(4));
        assert_eq!(profile.matching_signature(b"fine"), None);
    }

    #[test]
    fn test_builtin_lookup() {
        for name in BackpressureProfile::BUILTIN {
            assert_eq!(BackpressureProfile::builtin(name).map(|p| p.name), Some(name.to_string()));
        }
        assert!(BackpressureProfile::builtin("mysql").is_none());
    }

    #[test]
    fn test_profile_from_toml() {
        let profile: BackpressureProfile = toml::from_str(
            r#"
            name = "custom"
            [[signatures]]
            all_of = ["overloaded", "retry"]
            "#,
        )
        .expect("valid profile");
        assert_eq!(profile.version, 1);
        assert_eq!(profile.status_codes, vec![500]);
        assert!(profile.is_backpressure(500, b"overloaded, retry later"));
        assert!(!profile.is_backpressure(500, b"overloaded"));
    }

    #[test]
    fn test_validate_rejects_empty_pattern() {
        let mut profile = BackpressureProfile::none();
        profile.signatures.push(Signature { all_of: vec!["busy".into()] });
        profile.signatures.push(Signature { all_of: vec![String::new()] });
        assert_eq!(
            profile.validate(),
            Err(ProfileError::EmptyPattern {
                profile: "none".into(),
                index: 1,
            })
        );
        assert!(BackpressureProfile::cnosdb().validate().is_ok());

        let mut unnamed = BackpressureProfile::cnosdb();
        unnamed.name.clear();
        assert_eq!(unnamed.validate(), Err(ProfileError::EmptyName));
    }
}
