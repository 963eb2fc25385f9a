//! Core data models used throughout kb-harvest.
//!
//! These types represent the sources, articles, chunks, and discovered links
//! that flow through the harvest pipeline.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A registered crawl target stored in SQLite.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Serialized [`Credentials`], absent for public sources.
    pub credentials_json: Option<String>,
    pub category: Option<String>,
    pub is_active: bool,
    pub is_processed: bool,
    pub last_synced_at: Option<i64>,
    /// Accumulated raw corpus from the last harvest run, length-capped.
    pub content: Option<String>,
    pub summary: Option<String>,
    pub processed_at: Option<i64>,
    pub pages_crawled: i64,
}

/// Login credentials for an authentication-gated source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Source {
    /// Parse the stored credential blob, if any.
    ///
    /// Returns `None` both when no credentials are stored and when the
    /// stored blob is empty; a malformed blob is an error.
    pub fn credentials(&self) -> Result<Option<Credentials>> {
        match self.credentials_json.as_deref() {
            None | Some("") => Ok(None),
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
        }
    }
}

/// One extracted article, held in memory for the duration of a run.
///
/// Articles are never persisted individually; they are concatenated into
/// the source's raw corpus and discarded.
#[derive(Debug, Clone)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// A candidate article link found on a source page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    pub url: String,
    pub title: String,
}

/// A chunk of a source's corpus as produced by the chunker, before storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub heading: Option<String>,
    pub content: String,
}

/// A retrieval-sized chunk of a source's corpus, stored in SQLite.
///
/// `chunk_index` mirrors document order; chunks for a source are replaced
/// wholesale on each reprocessing, never updated in place.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub heading: Option<String>,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with_creds(json: Option<&str>) -> Source {
        Source {
            id: "s1".into(),
            name: "Test".into(),
            url: "https://example.com".into(),
            credentials_json: json.map(String::from),
            category: None,
            is_active: true,
            is_processed: false,
            last_synced_at: None,
            content: None,
            summary: None,
            processed_at: None,
            pages_crawled: 0,
        }
    }

    #[test]
    fn credentials_absent() {
        assert!(source_with_creds(None).credentials().unwrap().is_none());
        assert!(source_with_creds(Some("")).credentials().unwrap().is_none());
    }

    #[test]
    fn credentials_parsed() {
        let creds = source_with_creds(Some(r#"{"email":"a@b.nl","password":"pw"}"#))
            .credentials()
            .unwrap()
            .unwrap();
        assert_eq!(creds.email, "a@b.nl");
        assert_eq!(creds.password, "pw");
    }

    #[test]
    fn credentials_malformed() {
        assert!(source_with_creds(Some("{not json")).credentials().is_err());
    }
}
