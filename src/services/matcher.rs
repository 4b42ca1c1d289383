use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use crate::domain::search_item::SearchItem;
use crate::utils::normalizations::{matcher_normalize, trigrams};

const MIN_COVERAGE: f64 = 0.4;
const SUBSTRING_BONUS: f64 = 0.5;
const SHORT_WORD_THRESHOLD: usize = 2;

struct Entry {
    item: SearchItem,
    normalized: String,
    trigrams: HashSet<String>,
}

/// A scored hit against a `TrigramMatcher` index.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub item: SearchItem,
    pub score: f64,
}

/// In-memory fuzzy matcher over a fixed set of `SearchItem`s (spec §4.4).
/// Immutable once built; see `MatcherCache` for the invalidate/rebuild
/// wrapper the library facade uses to keep this in step with the store.
pub struct TrigramMatcher {
    entries: Vec<Entry>,
}

impl TrigramMatcher {
    pub fn build(items: Vec<SearchItem>) -> Self {
        let entries = items
            .into_iter()
            .map(|item| {
                let normalized = matcher_normalize(&item.filter);
                let trigrams = trigrams(&normalized);
                Entry { item, normalized, trigrams }
            })
            .collect();

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scores every item against `query`. A blank query returns every item
    /// with score 0.0 in original order. Each word in the query must clear
    /// its own bar for the item to count at all: words of two characters or
    /// fewer require a literal substring match (worth 1.0), longer words
    /// require trigram coverage of at least 0.4 (plus a 0.5 bonus if the
    /// word is also a literal substring). The item's score is the sum of
    /// its word scores divided by the word count. Items that fail any word
    /// score 0 and are dropped; survivors are sorted by score descending,
    /// ties keeping their original relative order.
    pub fn search(&self, query: &str) -> Vec<ScoredMatch> {
        if query.trim().is_empty() {
            return self
                .entries
                .iter()
                .map(|entry| ScoredMatch { item: entry.item.clone(), score: 0.0 })
                .collect();
        }

        let words: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = Vec::new();

        for (index, entry) in self.entries.iter().enumerate() {
            let mut total = 0.0;
            let mut disqualified = false;

            for word in &words {
                match score_word(word, entry) {
                    Some(contribution) => total += contribution,
                    None => {
                        disqualified = true;
                        break;
                    }
                }
            }

            if disqualified {
                continue;
            }

            let score = total / words.len() as f64;
            if score > 0.0 {
                scored.push((index, score));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        scored
            .into_iter()
            .map(|(index, score)| ScoredMatch { item: self.entries[index].item.clone(), score })
            .collect()
    }
}

fn score_word(word: &str, entry: &Entry) -> Option<f64> {
    if word.chars().count() <= SHORT_WORD_THRESHOLD {
        return if entry.normalized.contains(word.as_str()) { Some(1.0) } else { None };
    }

    let word_trigrams = trigrams(&matcher_normalize(word));
    if word_trigrams.is_empty() {
        return None;
    }

    let overlap = word_trigrams.intersection(&entry.trigrams).count();
    let coverage = overlap as f64 / word_trigrams.len() as f64;

    if coverage < MIN_COVERAGE {
        return None;
    }

    let mut contribution = coverage;
    if entry.normalized.contains(word.as_str()) {
        contribution += SUBSTRING_BONUS;
    }

    Some(contribution)
}

/// Holds a built matcher plus the item list it was built from, and rebuilds
/// lazily: `invalidate` just flips a flag, the next `get_or_build` call does
/// the actual rebuild (spec §9). Cheap to invalidate on every write, cheap
/// to read when nothing has changed since the last build.
pub struct MatcherCache {
    dirty: AtomicBool,
    state: Mutex<Option<(Vec<SearchItem>, Arc<TrigramMatcher>)>>,
}

impl Default for MatcherCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherCache {
    pub fn new() -> Self {
        Self { dirty: AtomicBool::new(true), state: Mutex::new(None) }
    }

    pub fn invalidate(&self) {
        self.dirty.store(true, AtomicOrdering::SeqCst);
    }

    /// Returns the cached `(items, matcher)` pair, rebuilding via `rebuild`
    /// first if the cache was invalidated (or never built).
    pub async fn get_or_build<F, Fut>(&self, rebuild: F) -> (Vec<SearchItem>, Arc<TrigramMatcher>)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Vec<SearchItem>>,
    {
        let needs_rebuild = self.dirty.swap(false, AtomicOrdering::SeqCst);

        if !needs_rebuild {
            let guard = self.state.lock().expect("matcher cache mutex poisoned");
            if let Some(cached) = guard.as_ref() {
                return cached.clone();
            }
        }

        let items = rebuild().await;
        let matcher = Arc::new(TrigramMatcher::build(items.clone()));

        let mut guard = self.state.lock().expect("matcher cache mutex poisoned");
        *guard = Some((items.clone(), matcher.clone()));
        (items, matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<SearchItem> {
        vec![
            SearchItem::new("apple pie".to_string(), "Apple Pie".to_string()),
            SearchItem::new("banana bread".to_string(), "Banana Bread".to_string()),
            SearchItem::new("apple cider".to_string(), "Apple Cider".to_string()),
        ]
    }

    #[test]
    fn blank_query_scores_everything_zero_in_original_order() {
        let matcher = TrigramMatcher::build(items());
        let results = matcher.search("   ");
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.score == 0.0));
        assert_eq!(results[0].item.display, "Apple Pie");
        assert_eq!(results[2].item.display, "Apple Cider");
    }

    #[test]
    fn short_word_requires_literal_substring() {
        let matcher = TrigramMatcher::build(items());
        let results = matcher.search("pi");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.display, "Apple Pie");
    }

    #[test]
    fn longer_word_ranks_by_trigram_coverage_with_substring_bonus() {
        let matcher = TrigramMatcher::build(items());
        let results = matcher.search("apple");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.item.display.starts_with("Apple")));
    }

    #[test]
    fn cache_rebuilds_only_after_invalidate() {
        let cache = MatcherCache::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);

        let build = || {
            calls.fetch_add(1, AtomicOrdering::SeqCst);
            async { items() }
        };

        tokio_test_block_on(async {
            let (_, first) = cache.get_or_build(build).await;
            let (_, second) = cache.get_or_build(build).await;
            assert!(Arc::ptr_eq(&first, &second));

            cache.invalidate();
            let (_, third) = cache.get_or_build(build).await;
            assert!(!Arc::ptr_eq(&first, &third));
        });

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(fut)
    }
}
