//! End-to-end routing scenarios: strict failover order, terminal NotFound,
//! aggregation fault tolerance, and final error shaping.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{chain_config, ScriptedProvider};
use marketmux_core::{
    CallContext, DataRequest, DataType, ErrorKind, ProviderError, ProviderId, Router,
    RouterError, Ticker,
};

fn stock_info() -> DataRequest {
    DataRequest::StockInfo {
        ticker: Ticker::parse("AAPL").expect("valid ticker"),
    }
}

fn news() -> DataRequest {
    DataRequest::News {
        ticker: Ticker::parse("AAPL").expect("valid ticker"),
    }
}

#[tokio::test]
async fn failover_visits_providers_in_resolved_order() {
    let p1 = ScriptedProvider::new("p1", vec![Err(ProviderError::network("down"))]);
    let p2 = ScriptedProvider::new("p2", vec![Err(ProviderError::timeout("slow"))]);
    let p3 = ScriptedProvider::new("p3", vec![Ok(String::from("from-p3"))]);

    let config = chain_config(DataType::StockInfo, &["p1", "p2", "p3"], None);
    let router = Router::new(
        Arc::new(config),
        vec![p1.clone(), p2.clone(), p3.clone()],
    );

    let payload = router
        .dispatch(&stock_info(), &CallContext::new())
        .await
        .expect("third provider serves");
    assert_eq!(payload, "from-p3");
    assert_eq!(p1.call_count(), 1);
    assert_eq!(p2.call_count(), 1);
    assert_eq!(p3.call_count(), 1);
}

#[tokio::test]
async fn not_found_stops_the_chain_and_is_surfaced() {
    let p1 = ScriptedProvider::new("p1", vec![Err(ProviderError::not_found("no such symbol"))]);
    let p2 = ScriptedProvider::new("p2", vec![Ok(String::from("unused"))]);
    let p3 = ScriptedProvider::new("p3", vec![Ok(String::from("unused"))]);

    let config = chain_config(DataType::StockInfo, &["p1", "p2", "p3"], None);
    let router = Router::new(
        Arc::new(config),
        vec![p1.clone(), p2.clone(), p3.clone()],
    );

    let error = router
        .dispatch(&stock_info(), &CallContext::new())
        .await
        .expect_err("not found terminates");
    match error {
        RouterError::Exhausted(failure) => {
            assert_eq!(failure.surfaced_kind(), ErrorKind::NotFound);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(p2.call_count(), 0, "p2 must not be called");
    assert_eq!(p3.call_count(), 0, "p3 must not be called");
}

#[tokio::test]
async fn mixed_failures_shape_into_service_error() {
    let p1 = ScriptedProvider::new("p1", vec![Err(ProviderError::rate_limited("throttled"))]);
    let p2 = ScriptedProvider::new("p2", vec![Err(ProviderError::network("down"))]);

    let config = chain_config(DataType::StockInfo, &["p1", "p2"], None);
    let router = Router::new(Arc::new(config), vec![p1, p2]);

    let error = router
        .dispatch(&stock_info(), &CallContext::new())
        .await
        .expect_err("chain exhausts");
    match error {
        RouterError::Exhausted(failure) => {
            assert_eq!(failure.surfaced_kind(), ErrorKind::ServiceError);
            assert_eq!(
                failure.attempted,
                vec![ProviderId::new("p1"), ProviderId::new("p2")]
            );
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn aggregation_survives_a_network_failure_peer() {
    let block = "Title: Apple Earnings Beat Expectations\nPublisher: Reuters\nPublished: 2026-02-27 10:00:00\nURL: https://example.com/reuters";
    let pa = ScriptedProvider::new("pA", vec![Ok(String::from(block))]);
    let pb = ScriptedProvider::new("pB", vec![Err(ProviderError::network("unreachable"))]);

    let config = chain_config(DataType::News, &["pA", "pB"], Some(true));
    let router = Router::new(Arc::new(config), vec![pa, pb]);

    let payload = router
        .dispatch(&news(), &CallContext::new())
        .await
        .expect("single success wins");
    assert_eq!(payload.matches("Title:").count(), 1);
    assert!(payload.contains("Apple Earnings Beat Expectations"));
    assert!(
        !payload.contains("Sources:"),
        "a lone source gets no attribution line"
    );
    assert!(!payload.contains("Merged Count"));
}

#[tokio::test]
async fn aggregation_result_is_deterministic_across_arrival_orders() {
    let block_a = "Title: First provider story alpha\nPublished: 2026-03-01 10:00:00\nURL: https://example.com/a";
    let block_b = "Title: Second provider story beta\nPublished: 2026-03-02 10:00:00\nURL: https://example.com/b";

    // Run twice with the delay on opposite providers; the reduced output
    // must not change.
    let mut outputs = Vec::new();
    for slow_first in [true, false] {
        let (delay_a, delay_b) = if slow_first {
            (Some(Duration::from_millis(30)), None)
        } else {
            (None, Some(Duration::from_millis(30)))
        };
        let pa = match delay_a {
            Some(delay) => {
                ScriptedProvider::delayed("pA", delay, vec![Ok(String::from(block_a))])
            }
            None => ScriptedProvider::new("pA", vec![Ok(String::from(block_a))]),
        };
        let pb = match delay_b {
            Some(delay) => {
                ScriptedProvider::delayed("pB", delay, vec![Ok(String::from(block_b))])
            }
            None => ScriptedProvider::new("pB", vec![Ok(String::from(block_b))]),
        };

        let config = chain_config(DataType::News, &["pA", "pB"], Some(true));
        let router = Router::new(Arc::new(config), vec![pa, pb]);
        outputs.push(
            router
                .dispatch(&news(), &CallContext::new())
                .await
                .expect("aggregation succeeds"),
        );
    }

    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn all_not_found_peers_surface_not_found() {
    let pa = ScriptedProvider::new("pA", vec![Err(ProviderError::not_found("gone"))]);
    let pb = ScriptedProvider::new("pB", vec![Err(ProviderError::not_found("gone"))]);

    let config = chain_config(DataType::News, &["pA", "pB"], Some(true));
    let router = Router::new(Arc::new(config), vec![pa, pb]);

    let error = router
        .dispatch(&news(), &CallContext::new())
        .await
        .expect_err("no successes");
    match error {
        RouterError::Exhausted(failure) => {
            assert_eq!(failure.surfaced_kind(), ErrorKind::NotFound)
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn dedup_disabled_returns_chain_ordered_raw_merge() {
    let pa = ScriptedProvider::new(
        "pA",
        vec![Ok(String::from("Title: A\nURL: https://example.com/a\n"))],
    );
    let pb = ScriptedProvider::new(
        "pB",
        vec![Ok(String::from("Title: B\nURL: https://example.com/b"))],
    );

    let mut config = chain_config(DataType::News, &["pA", "pB"], Some(true));
    config.news_deduplication.enabled = false;

    let router = Router::new(Arc::new(config), vec![pa, pb]);
    let payload = router
        .dispatch(&news(), &CallContext::new())
        .await
        .expect("raw merge");
    assert_eq!(
        payload,
        "Title: A\nURL: https://example.com/a\n\nTitle: B\nURL: https://example.com/b"
    );
}

#[tokio::test]
async fn router_exposes_health_and_breaker_introspection() {
    let p1 = ScriptedProvider::new(
        "p1",
        vec![
            Err(ProviderError::network("down")),
            Ok(String::from("ok")),
        ],
    );

    let config = chain_config(DataType::StockInfo, &["p1"], None);
    let router = Router::new(Arc::new(config), vec![p1]);

    let _ = router.dispatch(&stock_info(), &CallContext::new()).await;
    let _ = router.dispatch(&stock_info(), &CallContext::new()).await;

    let health = router.health_snapshots();
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].0, ProviderId::new("p1"));
    assert_eq!(health[0].1.sample_count, 2);

    let breakers = router.breaker_metrics();
    assert_eq!(breakers.len(), 1);
    assert_eq!(breakers[0].1.total_failures, 1);
    assert_eq!(breakers[0].1.total_successes, 1);
}
