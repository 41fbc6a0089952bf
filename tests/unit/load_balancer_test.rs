//! Unit tests for candidate ordering

#[path = "../common/mod.rs"]
mod common;

use common::{registry_with, MockBackend};
use imagegen_gateway::config::HealthConfig;
use imagegen_gateway::error::ErrorKind;
use imagegen_gateway::gateway::{HealthTracker, LoadBalancer, SelectionStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn ids(order: &[std::sync::Arc<imagegen_gateway::backend::RegisteredBackend>]) -> Vec<String> {
    order.iter().map(|b| b.id().to_string()).collect()
}

fn three() -> Vec<MockBackend> {
    vec![MockBackend::new("a"), MockBackend::new("b"), MockBackend::new("c")]
}

#[test]
fn test_priority_orders_by_rank_then_registration() {
    let (registry, _) = registry_with(vec![
        MockBackend::new("low").priority(1),
        MockBackend::new("high").priority(10),
        MockBackend::new("mid-1").priority(5),
        MockBackend::new("mid-2").priority(5),
    ]);
    let health = HealthTracker::new(&HealthConfig::default());
    let balancer = LoadBalancer::new(SelectionStrategy::Priority);

    let order = balancer.candidate_order(&registry.get_all(), &health, None);
    assert_eq!(ids(&order), vec!["high", "mid-1", "mid-2", "low"]);
}

#[test]
fn test_round_robin_spreads_first_choice_evenly() {
    let (registry, _) = registry_with(three());
    let health = HealthTracker::new(&HealthConfig::default());
    let balancer = LoadBalancer::new(SelectionStrategy::RoundRobin);

    let mut firsts: HashMap<String, usize> = HashMap::new();
    for _ in 0..10 {
        let order = balancer.candidate_order(&registry.get_all(), &health, None);
        assert_eq!(order.len(), 3);
        *firsts.entry(order[0].id().to_string()).or_default() += 1;
    }

    // 10 requests over 3 backends: each leads floor(10/3) or ceil(10/3) times
    for id in ["a", "b", "c"] {
        let count = firsts.get(id).copied().unwrap_or(0);
        assert!((3..=4).contains(&count), "{} led {} times", id, count);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_robin_is_even_under_concurrency() {
    let (registry, _) = registry_with(three());
    let health = Arc::new(HealthTracker::new(&HealthConfig::default()));
    let balancer = Arc::new(LoadBalancer::new(SelectionStrategy::RoundRobin));
    let start = Arc::new(tokio::sync::Barrier::new(31));

    let tasks: Vec<_> = (0..31)
        .map(|_| {
            let (registry, health, balancer, start) =
                (registry.clone(), health.clone(), balancer.clone(), start.clone());
            tokio::spawn(async move {
                start.wait().await;
                let order = balancer.candidate_order(&registry.get_all(), &health, None);
                assert_eq!(order.len(), 3);
                order[0].id().to_string()
            })
        })
        .collect();

    let mut firsts: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        *firsts.entry(task.await.unwrap()).or_default() += 1;
    }

    // 31 requests over 3 backends: each leads 10 or 11 times
    for id in ["a", "b", "c"] {
        let count = firsts.get(id).copied().unwrap_or(0);
        assert!((10..=11).contains(&count), "{} led {} times", id, count);
    }
}

#[test]
fn test_strategy_names_match_config_spelling() {
    for (name, expected) in [
        ("round_robin", SelectionStrategy::RoundRobin),
        ("random", SelectionStrategy::Random),
        ("priority", SelectionStrategy::Priority),
        ("fastest", SelectionStrategy::FastestResponse),
        ("fastest_response", SelectionStrategy::FastestResponse),
    ] {
        let parsed: SelectionStrategy = name.parse().unwrap();
        let deserialized: SelectionStrategy = serde_json::from_value(serde_json::json!(name)).unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(deserialized, expected);
    }
    assert!("cheapest".parse::<SelectionStrategy>().is_err());
}

#[test]
fn test_round_robin_keeps_rotation_order() {
    let (registry, _) = registry_with(three());
    let health = HealthTracker::new(&HealthConfig::default());
    let balancer = LoadBalancer::new(SelectionStrategy::RoundRobin);

    let first = balancer.candidate_order(&registry.get_all(), &health, None);
    let second = balancer.candidate_order(&registry.get_all(), &health, None);

    assert_eq!(ids(&first), vec!["a", "b", "c"]);
    assert_eq!(ids(&second), vec!["b", "c", "a"]);
}

#[test]
fn test_random_is_a_permutation_of_eligible() {
    let (registry, _) = registry_with(three());
    let health = HealthTracker::new(&HealthConfig::default());
    let balancer = LoadBalancer::new(SelectionStrategy::Random);

    for _ in 0..20 {
        let mut order = ids(&balancer.candidate_order(&registry.get_all(), &health, None));
        order.sort();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}

#[test]
fn test_fastest_orders_by_latency_unmeasured_first() {
    let (registry, _) = registry_with(three());
    let health = HealthTracker::new(&HealthConfig::default());
    health.record_outcome("a", Duration::from_millis(900), None);
    health.record_outcome("b", Duration::from_millis(100), None);

    let balancer = LoadBalancer::new(SelectionStrategy::FastestResponse);
    let order = balancer.candidate_order(&registry.get_all(), &health, None);

    assert_eq!(ids(&order), vec!["c", "b", "a"]);
}

#[test]
fn test_disabled_and_ineligible_are_filtered() {
    let (registry, _) = registry_with(vec![
        MockBackend::new("a"),
        MockBackend::new("b").disabled(),
        MockBackend::new("c"),
    ]);
    let health = HealthTracker::new(&HealthConfig {
        failure_threshold: 1,
        ..HealthConfig::default()
    });
    health.record_outcome("c", Duration::from_millis(5), Some((ErrorKind::BackendError, "down")));

    let balancer = LoadBalancer::new(SelectionStrategy::Priority);
    let order = balancer.candidate_order(&registry.get_all(), &health, None);

    assert_eq!(ids(&order), vec!["a"]);
}

#[test]
fn test_preferred_backend_goes_first() {
    let (registry, _) = registry_with(vec![
        MockBackend::new("a").priority(3),
        MockBackend::new("b").priority(2),
        MockBackend::new("c").priority(1),
    ]);
    let health = HealthTracker::new(&HealthConfig::default());
    let balancer = LoadBalancer::new(SelectionStrategy::Priority);

    let order = balancer.candidate_order(&registry.get_all(), &health, Some("c"));
    assert_eq!(ids(&order), vec!["c", "a", "b"]);
}

#[test]
fn test_ineligible_preferred_falls_back_to_strategy() {
    let (registry, _) = registry_with(three());
    let health = HealthTracker::new(&HealthConfig {
        failure_threshold: 1,
        ..HealthConfig::default()
    });
    health.record_outcome("b", Duration::from_millis(5), Some((ErrorKind::AuthError, "bad key")));

    let balancer = LoadBalancer::new(SelectionStrategy::Priority);
    let order = balancer.candidate_order(&registry.get_all(), &health, Some("b"));

    assert_eq!(ids(&order), vec!["a", "c"]);
}
