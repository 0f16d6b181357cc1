//! Core records that flow between ingestion, the LLM layer, and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::corpus::Corpus;

/// Content category assigned to a file by [`crate::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Text,
    Code,
    Binary,
    Other,
}

impl FileCategory {
    /// Only textual files contribute content to the corpus.
    pub fn is_corpus_eligible(self) -> bool {
        matches!(self, FileCategory::Text | FileCategory::Code)
    }
}

/// Result of walking one working tree.
#[derive(Debug, Clone)]
pub struct ExtractedRepo {
    /// Every visited file, relative to the tree root, in walk order.
    pub index: Vec<String>,
    pub corpus: Corpus,
    /// Unicode scalar count of the corpus text.
    pub char_count: usize,
}

/// Immutable log entry of one completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub repo_url: String,
    pub timestamp: DateTime<Utc>,
}

/// Provider-issued handle to a registered corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHandle {
    /// Full provider resource name.
    pub name: String,
    #[serde(rename = "modelName")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,
}

impl CacheHandle {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_time.map(|t| t <= now).unwrap_or(false)
    }

    /// Last path segment of the resource name.
    pub fn short_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn handle(expire_in: Option<i64>) -> CacheHandle {
        CacheHandle {
            name: "projects/p/locations/l/cachedContents/123".to_string(),
            model: "gemini-2.5-flash".to_string(),
            display_name: None,
            create_time: None,
            expire_time: expire_in.map(|s| Utc::now() + Duration::seconds(s)),
        }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(!handle(Some(3600)).is_expired_at(now));
        assert!(handle(Some(-5)).is_expired_at(now));
        assert!(!handle(None).is_expired_at(now));
    }

    #[test]
    fn test_short_id_and_wire_names() {
        let h = handle(None);
        assert_eq!(h.short_id(), "123");
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["modelName"], "gemini-2.5-flash");
        assert!(json.get("expireTime").is_none());
    }

    #[test]
    fn test_history_record_uses_type_key() {
        let record = HistoryRecord {
            kind: "summary".to_string(),
            text: "ok".to_string(),
            repo_url: "https://example/repo.git".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "summary");
        let back: HistoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_eligibility() {
        assert!(FileCategory::Text.is_corpus_eligible());
        assert!(FileCategory::Code.is_corpus_eligible());
        assert!(!FileCategory::Binary.is_corpus_eligible());
        assert!(!FileCategory::Other.is_corpus_eligible());
    }
}
