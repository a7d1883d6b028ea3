use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::countries::CountryEntry;

/// Fuzzy country lookup over display names and keys.
pub struct CountrySearch<'a> {
    entries: &'a [CountryEntry],
    fuzzy_matcher: SkimMatcherV2,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryMatch {
    pub country_key: String,
    pub country_name: String,
    pub score: i64,
    pub match_reasons: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchSummary {
    pub query: String,
    pub total_results: usize,
    pub search_time_ms: u128,
    pub results: Vec<CountryMatch>,
}

impl<'a> CountrySearch<'a> {
    pub fn new(entries: &'a [CountryEntry]) -> Self {
        Self {
            entries,
            fuzzy_matcher: SkimMatcherV2::default().ignore_case(),
        }
    }

    /// Rank countries against `query`, best first, keeping at most `limit`.
    pub fn search(&self, query: &str, limit: usize) -> SearchSummary {
        let start_time = std::time::Instant::now();
        let query = query.trim();
        info!("Searching countries for: '{}'", query);

        let mut results: Vec<CountryMatch> = if query.is_empty() {
            Vec::new()
        } else {
            self.entries
                .iter()
                .filter_map(|entry| self.score_entry(entry, query))
                .collect()
        };

        results.sort_by(|a, b| match b.score.cmp(&a.score) {
            Ordering::Equal => a.country_name.cmp(&b.country_name),
            other => other,
        });
        results.truncate(limit);

        let summary = SearchSummary {
            query: query.to_string(),
            total_results: results.len(),
            search_time_ms: start_time.elapsed().as_millis(),
            results,
        };
        debug!("Search completed: {} results in {}ms", summary.total_results, summary.search_time_ms);
        summary
    }

    /// Best fuzzy score over name and key; an exact key match ranks above everything.
    fn score_entry(&self, entry: &CountryEntry, query: &str) -> Option<CountryMatch> {
        let mut best_score: Option<i64> = None;
        let mut match_reasons = Vec::new();

        if let Some(score) = self.fuzzy_matcher.fuzzy_match(&entry.country_name, query) {
            best_score = Some(score);
            match_reasons.push("Name".to_string());
        }

        if entry.country_key.eq_ignore_ascii_case(query) {
            best_score = Some(i64::MAX);
            match_reasons.push("Key".to_string());
        } else if let Some(score) = self.fuzzy_matcher.fuzzy_match(&entry.country_key, query) {
            best_score = Some(best_score.map_or(score, |s| s.max(score)));
            match_reasons.push("Key".to_string());
        }

        best_score.map(|score| CountryMatch {
            country_key: entry.country_key.clone(),
            country_name: entry.country_name.clone(),
            score,
            match_reasons,
        })
    }

    /// Country names containing `partial`, for completion.
    pub fn suggestions(&self, partial: &str, limit: usize) -> Vec<String> {
        let partial = partial.trim().to_lowercase();
        let mut suggestions: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.country_name.to_lowercase().contains(&partial))
            .map(|e| e.country_name.clone())
            .collect();
        suggestions.sort();
        suggestions.dedup();
        suggestions.truncate(limit);
        suggestions
    }
}
