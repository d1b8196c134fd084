//! Retrieval: embed the query, search the vector store under the inclusion
//! mask, and hand back candidate chunks.
//!
//! Retrieval degrades instead of failing: when the embedding endpoint or
//! the vector store errors, the result is empty and the chat proceeds with
//! no context.

use std::sync::Arc;

use chrono::{Datelike, TimeZone, Utc};
use tracing::{debug, warn};

use lifequery_core::{EmbeddingBackend, Result, RetrievedChunk, Settings};
use lifequery_db::Database;
use lifequery_vector::{QueryFilter, VectorStore};

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

fn month_range(year: i32, month: u32) -> Option<(i64, i64)> {
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let end = if month == 12 {
        Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?
    } else {
        Utc.with_ymd_and_hms(year, month + 1, 1, 0, 0, 0).single()?
    };
    Some((start.timestamp(), end.timestamp()))
}

/// Extract a month/year range mentioned in the query ("November 2024",
/// "nov", "2023"). A bare month resolves to its most recent occurrence.
pub fn parse_date_range(query: &str) -> Option<(i64, i64)> {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let month = MONTHS
        .iter()
        .find(|(name, _)| words.iter().any(|w| w == name))
        .map(|(_, num)| *num);

    let year = words
        .iter()
        .find(|w| w.len() == 4 && w.starts_with("20") && w.chars().all(|c| c.is_ascii_digit()))
        .and_then(|w| w.parse::<i32>().ok());

    match (month, year) {
        (Some(month), Some(year)) => month_range(year, month),
        (Some(month), None) => {
            let now = Utc::now();
            let year = if month > now.month() {
                now.year() - 1
            } else {
                now.year()
            };
            month_range(year, month)
        }
        (None, Some(year)) => {
            let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
            let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
            Some((start.timestamp(), end.timestamp()))
        }
        (None, None) => None,
    }
}

/// Retrieve up to `top_k` candidate chunks for a query, restricted to
/// included chats and any date range the query mentions.
pub async fn retrieve(
    query: &str,
    settings: &Settings,
    db: &Database,
    vectors: &VectorStore,
    embedder: &Arc<dyn EmbeddingBackend>,
) -> Result<Vec<RetrievedChunk>> {
    let included = db.chats.included_ids().await?;
    if included.is_empty() {
        debug!("No included chats; retrieval returns nothing");
        return Ok(vec![]);
    }

    let mut filter = QueryFilter {
        chat_ids: Some(included),
        ..Default::default()
    };
    if let Some((start, end)) = parse_date_range(query) {
        debug!(start, end, "Applying date filter from query");
        filter.start_ts = Some(start);
        filter.end_ts = Some(end);
    }

    let embedding = match embedder.embed(&[query.to_string()]).await {
        Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
        Ok(_) => return Ok(vec![]),
        Err(e) => {
            warn!(error = %e, "Query embedding failed; continuing without context");
            return Ok(vec![]);
        }
    };

    match vectors
        .query(&embedding, settings.top_k.max(0) as usize, &filter)
        .await
    {
        Ok(chunks) => {
            debug!(
                subsystem = "rag",
                op = "retrieve",
                result_count = chunks.len(),
                "Retrieval complete"
            );
            Ok(chunks)
        }
        Err(e) => {
            warn!(error = %e, "Vector query failed; continuing without context");
            Ok(vec![])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_month_and_year() {
        let (start, end) = parse_date_range("what happened in November 2024?").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap().timestamp());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap().timestamp());
    }

    #[test]
    fn test_parse_december_wraps_year() {
        let (_, end) = parse_date_range("december 2023").unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp());
    }

    #[test]
    fn test_parse_year_only_spans_year() {
        let (start, end) = parse_date_range("trips in 2022").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap().timestamp());
        assert_eq!(end, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap().timestamp());
    }

    #[test]
    fn test_parse_abbreviated_month() {
        assert!(parse_date_range("around nov 2024").is_some());
    }

    #[test]
    fn test_parse_bare_month_resolves_to_recent() {
        let (start, _) = parse_date_range("back in march").unwrap();
        let now = Utc::now();
        let expected_year = if 3 > now.month() { now.year() - 1 } else { now.year() };
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(expected_year, 3, 1, 0, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_parse_no_date() {
        assert!(parse_date_range("what do I like to eat?").is_none());
    }

    #[test]
    fn test_month_name_requires_word_boundary() {
        // "decade" must not match "dec".
        assert!(parse_date_range("in the last decade of work").is_none());
    }
}
