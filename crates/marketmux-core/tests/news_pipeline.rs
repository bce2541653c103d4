//! News deduplication scenarios run through the router: source attribution,
//! threshold boundaries, truncation, and provider-id hygiene.

mod common;

use std::sync::Arc;

use common::{chain_config, ScriptedProvider};
use marketmux_core::{
    title_similarity, CallContext, DataRequest, DataType, Router, Ticker,
};

fn news() -> DataRequest {
    DataRequest::News {
        ticker: Ticker::parse("AAPL").expect("valid ticker"),
    }
}

#[tokio::test]
async fn merged_article_attributes_publishers_and_earliest_timestamp() {
    let reuters = "Title: Apple Earnings Beat Expectations\nPublisher: Reuters\nPublished: 2026-02-27 10:00:00\nURL: https://example.com/reuters";
    let bloomberg = "Title: Apple Earnings Beat Expectations\nPublisher: Bloomberg\nPublished: 2026-02-27 09:30:00\nURL: https://example.com/bloomberg";

    let pa = ScriptedProvider::new("pA", vec![Ok(String::from(reuters))]);
    let pb = ScriptedProvider::new("pB", vec![Ok(String::from(bloomberg))]);

    let mut config = chain_config(DataType::News, &["pA", "pB"], Some(true));
    config.news_deduplication.similarity_threshold = 0.85;
    config.news_deduplication.timestamp_window_hours = 24;
    config.news_deduplication.max_articles_for_comparison = 200;
    config.news_deduplication.compare_content = false;

    let router = Router::new(Arc::new(config), vec![pa, pb]);
    let payload = router
        .dispatch(&news(), &CallContext::new())
        .await
        .expect("news aggregation succeeds");

    assert_eq!(payload.matches("Title:").count(), 1, "got: {payload}");
    assert!(payload.contains("Published: 2026-02-27 09:30:00"));
    assert!(payload.contains("Sources: Bloomberg, Reuters"));
    assert!(payload.contains("Merged Count: 1"));
    assert!(!payload.contains("pA"), "provider id leaked: {payload}");
    assert!(!payload.contains("pB"), "provider id leaked: {payload}");
}

#[tokio::test]
async fn similarity_threshold_is_a_sharp_boundary() {
    let left = "Apple launches iPhone 16 globally";
    let right = "Apple launches iPhone 16 worldwide";
    let measured = title_similarity(left, right);
    assert!(measured > 0.0 && measured < 1.0);

    for (threshold, expected_titles) in [(measured, 1), ((measured + 0.01).min(0.99), 2)] {
        let pa = ScriptedProvider::new(
            "pA",
            vec![Ok(format!("Title: {left}\nURL: https://example.com/1"))],
        );
        let pb = ScriptedProvider::new(
            "pB",
            vec![Ok(format!("Title: {right}\nURL: https://example.com/2"))],
        );

        let mut config = chain_config(DataType::News, &["pA", "pB"], Some(true));
        config.news_deduplication.similarity_threshold = threshold;

        let router = Router::new(Arc::new(config), vec![pa, pb]);
        let payload = router
            .dispatch(&news(), &CallContext::new())
            .await
            .expect("news aggregation succeeds");
        assert_eq!(
            payload.matches("Title:").count(),
            expected_titles,
            "threshold {threshold} produced: {payload}"
        );
    }
}

#[tokio::test]
async fn max_articles_cap_truncates_the_input() {
    let blocks = "Title: A\nURL: https://example.com/a\n\nTitle: B\nURL: https://example.com/b\n\nTitle: C\nURL: https://example.com/c";
    let pa = ScriptedProvider::new("pA", vec![Ok(String::from(blocks))]);

    let mut config = chain_config(DataType::News, &["pA"], Some(true));
    // Validation floor is 10; the dedup pass itself honors lower effective
    // caps, so drive it directly through the config the router hands over.
    config.news_deduplication.max_articles_for_comparison = 2;

    let router = Router::new(Arc::new(config), vec![pa]);
    let payload = router
        .dispatch(&news(), &CallContext::new())
        .await
        .expect("news aggregation succeeds");
    assert_eq!(payload.matches("Title:").count(), 2, "got: {payload}");
}

#[tokio::test]
async fn single_provider_round_trip_preserves_articles() {
    let blocks = "Title: Apple Earnings Beat Expectations\nPublisher: Reuters\nPublished: 2026-02-27 10:00:00\nRelated Tickers: AAPL\nURL: https://example.com/reuters\n\nTitle: Fed holds rates steady\nPublisher: AP\nPublished: 2026-02-26 12:00:00\nURL: https://example.com/fed";
    let pa = ScriptedProvider::new("pA", vec![Ok(String::from(blocks))]);

    let config = chain_config(DataType::News, &["pA"], Some(true));
    let router = Router::new(Arc::new(config), vec![pa]);

    let payload = router
        .dispatch(&news(), &CallContext::new())
        .await
        .expect("news aggregation succeeds");

    assert_eq!(payload.matches("Title:").count(), 2);
    assert!(payload.contains("Title: Apple Earnings Beat Expectations"));
    assert!(payload.contains("Title: Fed holds rates steady"));
    assert!(payload.contains("Related Tickers: AAPL"));
    assert!(!payload.contains("Merged Count"), "nothing merged");
}

#[tokio::test]
async fn exact_url_match_merges_even_below_threshold() {
    let pa = ScriptedProvider::new(
        "pA",
        vec![Ok(String::from(
            "Title: Morning briefing for investors\nURL: https://example.com/shared",
        ))],
    );
    let pb = ScriptedProvider::new(
        "pB",
        vec![Ok(String::from(
            "Title: Evening market wrap\nURL: https://example.com/SHARED",
        ))],
    );

    let mut config = chain_config(DataType::News, &["pA", "pB"], Some(true));
    config.news_deduplication.similarity_threshold = 0.99;

    let router = Router::new(Arc::new(config), vec![pa, pb]);
    let payload = router
        .dispatch(&news(), &CallContext::new())
        .await
        .expect("news aggregation succeeds");
    assert_eq!(payload.matches("Title:").count(), 1, "got: {payload}");
    assert!(payload.contains("Merged Count: 1"));
}
