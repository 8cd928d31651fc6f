//! Configuration Validation Tests
//!
//! Covers defaults, environment overrides and invalid input handling.

use std::collections::HashMap;
use std::time::Duration;

use icostate_core::config::{defaults, env_vars, ListenerPolicy, SystemConfig};
use icostate_core::Error;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = SystemConfig::default();
    assert_eq!(config.reset_poll_interval(), Duration::from_secs(1));
    assert_eq!(config.reset_timeout(), None);
    assert_eq!(config.reset_warn_after_polls, defaults::RESET_WARN_AFTER_POLLS);
    assert_eq!(config.listener_policy, ListenerPolicy::Isolate);
    assert!(config.validate().is_ok());
}

#[test]
fn test_no_overrides_yield_defaults() {
    let config = SystemConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config, SystemConfig::default());
}

#[test]
fn test_environment_overrides() {
    let config = SystemConfig::from_lookup(lookup(&[
        (env_vars::RESET_POLL_INTERVAL_MS, "250"),
        (env_vars::RESET_TIMEOUT_MS, " 5000 "),
        (env_vars::LISTENER_POLICY, "fail-fast"),
    ]))
    .unwrap();

    assert_eq!(config.reset_poll_interval(), Duration::from_millis(250));
    assert_eq!(config.reset_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(config.listener_policy, ListenerPolicy::FailFast);
}

#[test]
fn test_invalid_numbers_rejected() {
    let err = SystemConfig::from_lookup(lookup(&[(env_vars::RESET_TIMEOUT_MS, "soon")]))
        .unwrap_err();
    match err {
        Error::Config(msg) => assert!(msg.contains(env_vars::RESET_TIMEOUT_MS)),
        other => panic!("Unexpected error: {other:?}"),
    }
}

#[test]
fn test_zero_poll_interval_rejected() {
    let err = SystemConfig::from_lookup(lookup(&[(env_vars::RESET_POLL_INTERVAL_MS, "0")]))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_unknown_policy_rejected() {
    assert!("isolate".parse::<ListenerPolicy>().is_ok());
    assert!("FAIL_FAST".parse::<ListenerPolicy>().is_ok());
    assert!(matches!(
        "sometimes".parse::<ListenerPolicy>(),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_builder_methods() {
    let config = SystemConfig::default()
        .with_reset_poll_interval(Duration::from_millis(10))
        .with_reset_timeout(Duration::from_millis(100))
        .with_listener_policy(ListenerPolicy::FailFast);

    assert_eq!(config.reset_poll_interval_ms, 10);
    assert_eq!(config.reset_timeout_ms, Some(100));
    assert_eq!(config.listener_policy, ListenerPolicy::FailFast);
}

#[test]
fn test_deserialize_partial_json() {
    let config: SystemConfig =
        serde_json::from_str(r#"{"reset_timeout_ms": 3000, "listener_policy": "fail_fast"}"#)
            .unwrap();
    assert_eq!(config.reset_poll_interval_ms, defaults::RESET_POLL_INTERVAL_MS);
    assert_eq!(config.reset_timeout(), Some(Duration::from_secs(3)));
    assert_eq!(config.listener_policy, ListenerPolicy::FailFast);
}

#[test]
fn test_builders_round_up_sub_millisecond_durations() {
    let config = SystemConfig::default()
        .with_reset_poll_interval(Duration::from_micros(500))
        .with_reset_timeout(Duration::from_micros(1500));

    assert_eq!(config.reset_poll_interval_ms, 1);
    assert_eq!(config.reset_timeout_ms, Some(2));
    assert!(config.validate().is_ok());

    let config = SystemConfig::default().with_reset_poll_interval(Duration::ZERO);
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}
