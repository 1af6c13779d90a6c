//! User library models: collections, saved searches and search filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default collection color.
pub const DEFAULT_COLLECTION_COLOR: &str = "#89b4fa";

/// A user-defined grouping of clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub clip_count: u64,
    pub created_at: DateTime<Utc>,
}

/// How multiple search terms combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every term must match.
    #[default]
    All,
    /// Any term may match.
    Any,
}

/// Duration buckets offered by the search filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationRange {
    #[serde(rename = "0-10s")]
    UpTo10s,
    #[serde(rename = "10-30s")]
    From10To30s,
    #[serde(rename = "30s-1m")]
    From30sTo1m,
    #[serde(rename = "1-5m")]
    From1To5m,
    #[serde(rename = "5m+")]
    Over5m,
}

impl DurationRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpTo10s => "0-10s",
            Self::From10To30s => "10-30s",
            Self::From30sTo1m => "30s-1m",
            Self::From1To5m => "1-5m",
            Self::Over5m => "5m+",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "0-10s" => Some(Self::UpTo10s),
            "10-30s" => Some(Self::From10To30s),
            "30s-1m" => Some(Self::From30sTo1m),
            "1-5m" => Some(Self::From1To5m),
            "5m+" => Some(Self::Over5m),
            _ => None,
        }
    }

    /// Inclusive lower and exclusive upper bound in seconds.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Self::UpTo10s => (0.0, 10.0),
            Self::From10To30s => (10.0, 30.0),
            Self::From30sTo1m => (30.0, 60.0),
            Self::From1To5m => (60.0, 300.0),
            Self::Over5m => (300.0, f64::INFINITY),
        }
    }

    pub fn contains(&self, seconds: f64) -> bool {
        let (lo, hi) = self.bounds();
        seconds >= lo && seconds < hi
    }
}

/// Parse `SS`, `MM:SS`, `HH:MM:SS` or ISO-8601 `PT#H#M#S` durations.
pub fn parse_duration_secs(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(iso) = s.strip_prefix("PT").or_else(|| s.strip_prefix("pt")) {
        let mut total = 0.0;
        let mut num = String::new();
        for ch in iso.chars() {
            match ch {
                '0'..='9' | '.' => num.push(ch),
                'H' | 'h' => total += num.parse::<f64>().ok()? * 3600.0,
                'M' | 'm' => total += num.parse::<f64>().ok()? * 60.0,
                'S' | 's' => total += num.parse::<f64>().ok()?,
                _ => return None,
            }
            if ch.is_ascii_alphabetic() {
                num.clear();
            }
        }
        return Some(total);
    }
    let parts: Vec<f64> = s
        .split(':')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [secs] => Some(*secs),
        [m, secs] => Some(m * 60.0 + secs),
        [h, m, secs] => Some(h * 3600.0 + m * 60.0 + secs),
        _ => None,
    }
}

/// Structured search filters; every field is optional and composable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Name of a user collection the clip must belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<u8>,
    #[serde(default)]
    pub favorites_only: bool,
    #[serde(default)]
    pub downloaded_only: bool,
    #[serde(default)]
    pub match_mode: MatchMode,
}

/// A named (query, filters) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub id: i64,
    pub name: String,
    pub query: String,
    pub filters: SearchFilters,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration_secs("42"), Some(42.0));
        assert_eq!(parse_duration_secs("01:30"), Some(90.0));
        assert_eq!(parse_duration_secs("1:00:05"), Some(3605.0));
        assert_eq!(parse_duration_secs("PT1M5S"), Some(65.0));
        assert_eq!(parse_duration_secs("PT12S"), Some(12.0));
        assert_eq!(parse_duration_secs(""), None);
        assert_eq!(parse_duration_secs("abc"), None);
    }

    #[test]
    fn test_duration_range_bounds() {
        assert!(DurationRange::UpTo10s.contains(9.9));
        assert!(!DurationRange::UpTo10s.contains(10.0));
        assert!(DurationRange::Over5m.contains(10_000.0));
        assert_eq!(DurationRange::from_str("30s-1m"), Some(DurationRange::From30sTo1m));
    }

    #[test]
    fn test_filters_serialize_compactly() {
        let filters = SearchFilters {
            site: Some("Pexels".to_string()),
            duration: Some(DurationRange::From1To5m),
            ..Default::default()
        };
        let json = serde_json::to_string(&filters).unwrap();
        assert!(json.contains("\"1-5m\""));
        assert!(!json.contains("creator"));
        let back: SearchFilters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filters);
    }
}
