//! News parsing, clustering, and merge attribution.
//!
//! Providers return news as text blocks of `Key: value` lines separated by a
//! blank line. The deduplicator parses every provider's blocks, clusters
//! articles by exact URL or normalized-title similarity, merges each cluster
//! into one attributed article, and re-emits the block format.
//!
//! The pass is a pure function of `(responses, config)`: no state survives a
//! request. Provider ids drive source attribution internally but never
//! appear in the output; readers see publisher labels.

use std::time::{Duration, Instant};

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::debug;

use crate::config::NewsDedupConfig;
use crate::context::CallContext;
use crate::similarity::title_similarity;
use crate::source::ProviderId;

/// Maximum characters kept per sanitized field.
pub const MAX_FIELD_CHARS: usize = 512;

/// Articles compared by the quadratic pass are capped to this many
/// regardless of configuration.
const MAX_COMPARED_ARTICLES: usize = 200;

const PUBLISHED_FORMAT: &[time::format_description::FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Deduplication abort conditions. Neither is fatal for the request: the
/// router substitutes the raw merged payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DedupError {
    #[error("news deduplication exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("news deduplication cancelled")]
    Cancelled,
}

/// Attribution entry tracking where one copy of an article came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsSource {
    pub provider_id: ProviderId,
    pub url: String,
    pub publisher: String,
}

/// One parsed (and possibly merged) article.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    pub publisher: String,
    pub provider_id: ProviderId,
    pub published_at: Option<PrimitiveDateTime>,
    pub related_tickers: Vec<String>,
    pub sources: Vec<NewsSource>,
    pub is_merged: bool,
    pub merged_count: usize,
}

/// Strips control characters and angle brackets, collapses whitespace, and
/// truncates to the field cap.
pub fn sanitize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_FIELD_CHARS));
    let mut pending_space = false;
    for ch in input.trim().chars() {
        if ch.is_control() || ch == '<' || ch == '>' {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
        if out.chars().count() >= MAX_FIELD_CHARS {
            break;
        }
    }
    out.chars().take(MAX_FIELD_CHARS).collect()
}

/// Returns the sanitized URL when it is an absolute http(s) URL, otherwise
/// an empty string.
pub fn sanitize_url(input: &str) -> String {
    let trimmed: String = input
        .trim()
        .chars()
        .filter(|ch| !ch.is_control())
        .collect();
    if trimmed.chars().any(char::is_whitespace) {
        return String::new();
    }
    if trimmed.chars().count() > MAX_FIELD_CHARS {
        return String::new();
    }

    let lower = trimmed.to_ascii_lowercase();
    let rest = if let Some(rest) = lower.strip_prefix("https://") {
        rest
    } else if let Some(rest) = lower.strip_prefix("http://") {
        rest
    } else {
        return String::new();
    };

    let host = rest.split('/').next().unwrap_or("");
    if host.is_empty() {
        return String::new();
    }

    trimmed
}

fn parse_published(value: &str) -> Option<PrimitiveDateTime> {
    if let Ok(parsed) = PrimitiveDateTime::parse(value, PUBLISHED_FORMAT) {
        return Some(parsed);
    }
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        let utc = parsed.to_offset(UtcOffset::UTC);
        return Some(PrimitiveDateTime::new(utc.date(), utc.time()));
    }
    None
}

fn parse_tickers(value: &str) -> Vec<String> {
    let mut seen_lower: Vec<String> = Vec::new();
    let mut tickers = Vec::new();
    for raw in value.split(',') {
        let ticker = sanitize_text(raw);
        if ticker.is_empty() {
            continue;
        }
        let lower = ticker.to_lowercase();
        if seen_lower.contains(&lower) {
            continue;
        }
        seen_lower.push(lower);
        tickers.push(ticker);
    }
    tickers
}

/// Parses one provider's response into articles. Malformed blocks are
/// dropped; unrecognized keys are ignored.
pub fn parse_articles(provider_id: &ProviderId, text: &str) -> Vec<NewsArticle> {
    let mut articles = Vec::new();
    for block in split_blocks(text) {
        let mut title = String::new();
        let mut publisher = String::new();
        let mut url = String::new();
        let mut published_at = None;
        let mut related_tickers = Vec::new();

        for line in &block {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "title" => title = sanitize_text(value),
                "publisher" => publisher = sanitize_text(value),
                "published" => published_at = parse_published(value.trim()),
                "url" => url = sanitize_url(value),
                "related tickers" => related_tickers = parse_tickers(value),
                _ => {}
            }
        }

        if title.is_empty() && url.is_empty() {
            continue;
        }

        let source = NewsSource {
            provider_id: provider_id.clone(),
            url: url.clone(),
            publisher: publisher.clone(),
        };
        articles.push(NewsArticle {
            title,
            url,
            publisher,
            provider_id: provider_id.clone(),
            published_at,
            related_tickers,
            sources: vec![source],
            is_merged: false,
            merged_count: 0,
        });
    }
    articles
}

fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Clusters, merges, and re-serializes news blocks from multiple providers.
#[derive(Debug, Clone)]
pub struct NewsDeduplicator {
    config: NewsDedupConfig,
    budget: Duration,
}

impl NewsDeduplicator {
    pub fn new(config: NewsDedupConfig, budget: Duration) -> Self {
        Self { config, budget }
    }

    /// Runs the full parse → cluster → merge → order → serialize pipeline.
    ///
    /// `responses` must already be in chain order; the output is then fully
    /// deterministic. Exceeding the wall-clock budget or caller cancellation
    /// aborts with an error the router treats as non-fatal.
    pub fn deduplicate(
        &self,
        responses: &[(ProviderId, String)],
        ctx: &CallContext,
    ) -> Result<String, DedupError> {
        let started = Instant::now();

        let mut articles = Vec::new();
        for (provider_id, payload) in responses {
            articles.extend(parse_articles(provider_id, payload));
        }

        let cap = self
            .config
            .max_articles_for_comparison
            .clamp(1, MAX_COMPARED_ARTICLES);
        if articles.len() > cap {
            debug!(
                parsed = articles.len(),
                cap, "truncating articles before comparison"
            );
            articles.truncate(cap);
        }

        let clusters = self.cluster(&articles, ctx, started)?;
        let mut merged: Vec<NewsArticle> = clusters
            .into_iter()
            .map(|cluster| merge_cluster(&articles, &cluster))
            .collect();

        sort_articles(&mut merged);

        if started.elapsed() > self.budget {
            return Err(DedupError::Timeout(self.budget));
        }

        Ok(serialize_articles(&merged))
    }

    fn cluster(
        &self,
        articles: &[NewsArticle],
        ctx: &CallContext,
        started: Instant,
    ) -> Result<Vec<Vec<usize>>, DedupError> {
        let threshold = self.config.similarity_threshold.clamp(0.0, 1.0);
        let mut consumed = vec![false; articles.len()];
        let mut clusters = Vec::new();

        for i in 0..articles.len() {
            if consumed[i] {
                continue;
            }
            if ctx.is_cancelled() {
                return Err(DedupError::Cancelled);
            }
            if started.elapsed() > self.budget {
                return Err(DedupError::Timeout(self.budget));
            }

            consumed[i] = true;
            let mut members = vec![i];
            for j in (i + 1)..articles.len() {
                if consumed[j] {
                    continue;
                }
                if self.same_story(&articles[i], &articles[j], threshold) {
                    consumed[j] = true;
                    members.push(j);
                }
            }
            clusters.push(members);
        }

        Ok(clusters)
    }

    fn same_story(&self, a: &NewsArticle, b: &NewsArticle, threshold: f64) -> bool {
        if !a.url.is_empty() && !b.url.is_empty() && a.url.eq_ignore_ascii_case(&b.url) {
            return true;
        }

        // Stories far apart in time are different events even when the
        // headlines read the same.
        if let (Some(at), Some(bt)) = (a.published_at, b.published_at) {
            let apart = (at - bt).abs();
            if apart > time::Duration::hours(self.config.timestamp_window_hours) {
                return false;
            }
        }

        title_similarity(&a.title, &b.title) >= threshold
    }
}

fn merge_cluster(articles: &[NewsArticle], members: &[usize]) -> NewsArticle {
    let primary = &articles[members[0]];
    if members.len() == 1 {
        return primary.clone();
    }

    let published_at = members
        .iter()
        .filter_map(|&index| articles[index].published_at)
        .min();

    let mut tickers: Vec<String> = Vec::new();
    let mut tickers_lower: Vec<String> = Vec::new();
    for &index in members {
        for ticker in &articles[index].related_tickers {
            let lower = ticker.to_lowercase();
            if !tickers_lower.contains(&lower) {
                tickers_lower.push(lower);
                tickers.push(ticker.clone());
            }
        }
    }
    tickers.sort_by_key(|ticker| ticker.to_lowercase());

    let mut sources: Vec<NewsSource> = Vec::new();
    for &index in members {
        for source in &articles[index].sources {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }
    }
    sources.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));

    NewsArticle {
        title: primary.title.clone(),
        url: primary.url.clone(),
        publisher: primary.publisher.clone(),
        provider_id: primary.provider_id.clone(),
        published_at,
        related_tickers: tickers,
        sources,
        is_merged: true,
        merged_count: members.len() - 1,
    }
}

fn sort_articles(articles: &mut [NewsArticle]) {
    articles.sort_by(|a, b| match (a.published_at, b.published_at) {
        (Some(at), Some(bt)) => bt
            .cmp(&at)
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase())),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
    });
}

/// Publisher labels attributed to a merged article, never provider ids.
fn source_labels(article: &NewsArticle) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut labels_lower: Vec<String> = Vec::new();
    for source in &article.sources {
        if source.publisher.is_empty() {
            continue;
        }
        let lower = source.publisher.to_lowercase();
        if !labels_lower.contains(&lower) {
            labels_lower.push(lower);
            labels.push(source.publisher.clone());
        }
    }
    labels.sort_by_key(|label| label.to_lowercase());

    if labels.is_empty() {
        labels = (1..=article.sources.len())
            .map(|index| format!("Source {index}"))
            .collect();
    }
    labels
}

/// Re-emits articles in the block wire format.
pub fn serialize_articles(articles: &[NewsArticle]) -> String {
    let mut blocks = Vec::with_capacity(articles.len());
    for article in articles {
        let mut lines = Vec::new();
        lines.push(format!("Title: {}", article.title));
        lines.push(format!("Publisher: {}", article.publisher));
        let published = article
            .published_at
            .and_then(|at| at.format(PUBLISHED_FORMAT).ok())
            .unwrap_or_else(|| String::from("Unknown"));
        lines.push(format!("Published: {published}"));
        if !article.related_tickers.is_empty() {
            lines.push(format!(
                "Related Tickers: {}",
                article.related_tickers.join(", ")
            ));
        }
        if article.is_merged {
            lines.push(format!("Sources: {}", source_labels(article).join(", ")));
        }
        lines.push(format!("URL: {}", article.url));
        if article.is_merged {
            lines.push(format!("Merged Count: {}", article.merged_count));
        }
        blocks.push(lines.join("\n"));
    }
    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f64) -> NewsDedupConfig {
        NewsDedupConfig {
            enabled: true,
            similarity_threshold: threshold,
            timestamp_window_hours: 24,
            max_articles_for_comparison: 200,
            compare_content: false,
        }
    }

    fn dedup(threshold: f64) -> NewsDeduplicator {
        NewsDeduplicator::new(config(threshold), Duration::from_millis(500))
    }

    #[test]
    fn sanitize_strips_markup_and_collapses_whitespace() {
        assert_eq!(
            sanitize_text("  Apple <b>Beats</b>\tEstimates \u{7} again "),
            "Apple bBeats/b Estimates again"
        );
    }

    #[test]
    fn sanitize_truncates_long_fields() {
        let long = "x".repeat(900);
        assert_eq!(sanitize_text(&long).chars().count(), MAX_FIELD_CHARS);
    }

    #[test]
    fn urls_must_be_absolute_http() {
        assert_eq!(
            sanitize_url(" https://example.com/a?b=1 "),
            "https://example.com/a?b=1"
        );
        assert_eq!(sanitize_url("ftp://example.com"), "");
        assert_eq!(sanitize_url("/relative/path"), "");
        assert_eq!(sanitize_url("https://"), "");
        assert_eq!(sanitize_url("https://bad host/x"), "");
    }

    #[test]
    fn parser_drops_blocks_without_title_or_url() {
        let payload = "Publisher: Nobody\nPublished: 2026-01-01 00:00:00\n\nTitle: Kept\nURL: https://example.com/kept";
        let articles = parse_articles(&ProviderId::new("p1"), payload);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Kept");
    }

    #[test]
    fn parser_reads_recognized_keys_case_insensitively() {
        let payload = "title: Apple Earnings\nPUBLISHER: Reuters\npublished: 2026-02-27 10:00:00\nrelated tickers: AAPL, aapl, MSFT\nurl: https://example.com/a\nX-Custom: ignored";
        let articles = parse_articles(&ProviderId::new("p1"), payload);
        assert_eq!(articles.len(), 1);

        let article = &articles[0];
        assert_eq!(article.publisher, "Reuters");
        assert_eq!(article.related_tickers, vec!["AAPL", "MSFT"]);
        assert!(article.published_at.is_some());
        assert_eq!(article.sources.len(), 1);
    }

    #[test]
    fn merges_same_story_across_providers_with_attribution() {
        let a = (
            ProviderId::new("pA"),
            String::from(
                "Title: Apple Earnings Beat Expectations\nPublisher: Reuters\nPublished: 2026-02-27 10:00:00\nURL: https://example.com/reuters",
            ),
        );
        let b = (
            ProviderId::new("pB"),
            String::from(
                "Title: Apple Earnings Beat Expectations\nPublisher: Bloomberg\nPublished: 2026-02-27 09:30:00\nURL: https://example.com/bloomberg",
            ),
        );

        let output = dedup(0.85)
            .deduplicate(&[a, b], &CallContext::new())
            .expect("dedup succeeds");

        assert_eq!(output.matches("Title:").count(), 1);
        assert!(output.contains("Published: 2026-02-27 09:30:00"));
        assert!(output.contains("Sources: Bloomberg, Reuters"));
        assert!(output.contains("Merged Count: 1"));
        assert!(!output.contains("pA"), "provider id leaked: {output}");
        assert!(!output.contains("pB"), "provider id leaked: {output}");
    }

    #[test]
    fn exact_url_match_merges_regardless_of_titles() {
        let a = (
            ProviderId::new("p1"),
            String::from("Title: Completely different headline\nURL: https://example.com/story"),
        );
        let b = (
            ProviderId::new("p2"),
            String::from("Title: Nothing alike at all\nURL: HTTPS://EXAMPLE.COM/story"),
        );

        let output = dedup(0.99)
            .deduplicate(&[a, b], &CallContext::new())
            .expect("dedup succeeds");
        assert_eq!(output.matches("Title:").count(), 1);
        assert!(output.contains("Merged Count: 1"));
    }

    #[test]
    fn threshold_boundary_splits_near_duplicates() {
        let left = "Apple launches iPhone 16 globally";
        let right = "Apple launches iPhone 16 worldwide";
        let score = title_similarity(left, right);

        let a = (ProviderId::new("p1"), format!("Title: {left}\nURL: https://example.com/1"));
        let b = (ProviderId::new("p2"), format!("Title: {right}\nURL: https://example.com/2"));

        let merged = dedup(score)
            .deduplicate(&[a.clone(), b.clone()], &CallContext::new())
            .expect("dedup succeeds");
        assert_eq!(merged.matches("Title:").count(), 1);

        let split = dedup((score + 0.01).min(1.0))
            .deduplicate(&[a, b], &CallContext::new())
            .expect("dedup succeeds");
        assert_eq!(split.matches("Title:").count(), 2);
    }

    #[test]
    fn distant_timestamps_keep_similar_headlines_apart() {
        let a = (
            ProviderId::new("p1"),
            String::from(
                "Title: Apple announces quarterly results\nPublished: 2026-01-01 09:00:00\nURL: https://example.com/q1",
            ),
        );
        let b = (
            ProviderId::new("p2"),
            String::from(
                "Title: Apple announces quarterly results\nPublished: 2026-04-01 09:00:00\nURL: https://example.com/q2",
            ),
        );

        let output = dedup(0.85)
            .deduplicate(&[a, b], &CallContext::new())
            .expect("dedup succeeds");
        assert_eq!(output.matches("Title:").count(), 2);
    }

    #[test]
    fn truncation_cap_limits_compared_articles() {
        let payload = "Title: A\nURL: https://example.com/a\n\nTitle: B\nURL: https://example.com/b\n\nTitle: C\nURL: https://example.com/c";
        let config = NewsDedupConfig {
            max_articles_for_comparison: 2,
            ..config(0.85)
        };
        let dedup = NewsDeduplicator::new(config, Duration::from_millis(500));

        let output = dedup
            .deduplicate(
                &[(ProviderId::new("p1"), String::from(payload))],
                &CallContext::new(),
            )
            .expect("dedup succeeds");
        assert_eq!(output.matches("Title:").count(), 2);
    }

    #[test]
    fn output_orders_newest_first_with_nulls_last() {
        let payload = "Title: Old\nPublished: 2026-01-01 00:00:00\nURL: https://example.com/old\n\nTitle: Undated\nURL: https://example.com/undated\n\nTitle: New\nPublished: 2026-03-01 00:00:00\nURL: https://example.com/new";

        let output = dedup(0.99)
            .deduplicate(
                &[(ProviderId::new("p1"), String::from(payload))],
                &CallContext::new(),
            )
            .expect("dedup succeeds");

        let titles: Vec<&str> = output
            .lines()
            .filter_map(|line| line.strip_prefix("Title: "))
            .collect();
        assert_eq!(titles, vec!["New", "Old", "Undated"]);
    }

    #[test]
    fn rerunning_dedup_is_a_fixed_point_on_content() {
        let a = (
            ProviderId::new("pA"),
            String::from(
                "Title: Apple Earnings Beat Expectations\nPublisher: Reuters\nPublished: 2026-02-27 10:00:00\nRelated Tickers: AAPL\nURL: https://example.com/reuters\n\nTitle: Fed holds rates\nPublisher: AP\nPublished: 2026-02-26 12:00:00\nURL: https://example.com/fed",
            ),
        );
        let b = (
            ProviderId::new("pB"),
            String::from(
                "Title: Apple Earnings Beat Expectations\nPublisher: Bloomberg\nPublished: 2026-02-27 09:30:00\nURL: https://example.com/bloomberg",
            ),
        );

        let deduper = dedup(0.85);
        let first = deduper
            .deduplicate(&[a, b], &CallContext::new())
            .expect("first pass succeeds");
        let second = deduper
            .deduplicate(
                &[(ProviderId::new("pA"), first.clone())],
                &CallContext::new(),
            )
            .expect("second pass succeeds");

        let keep = |text: &str| {
            text.lines()
                .filter(|line| {
                    line.starts_with("Title:")
                        || line.starts_with("Published:")
                        || line.starts_with("URL:")
                })
                .map(str::to_owned)
                .collect::<Vec<_>>()
        };
        assert_eq!(keep(&first), keep(&second));
    }

    #[test]
    fn cancellation_aborts_the_outer_loop() {
        let ctx = CallContext::new();
        ctx.cancel();

        let payload = String::from("Title: A\nURL: https://example.com/a");
        let result = dedup(0.85).deduplicate(&[(ProviderId::new("p1"), payload)], &ctx);
        assert_eq!(result, Err(DedupError::Cancelled));
    }

    #[test]
    fn exhausted_budget_raises_timeout() {
        let deduper = NewsDeduplicator::new(config(0.85), Duration::ZERO);
        let payload = String::from("Title: A\nURL: https://example.com/a");
        let result = deduper.deduplicate(&[(ProviderId::new("p1"), payload)], &CallContext::new());
        assert!(matches!(result, Err(DedupError::Timeout(_))));
    }
}
