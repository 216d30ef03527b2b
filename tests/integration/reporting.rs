//! Report suppression bounds for healthy, unchanged instances

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use dbha::agent::ReportPolicy;
use dbha::circuit::JitterPolicy;
use dbha::config::AgentConfig;
use dbha::model::Outcome;

fn policy() -> ReportPolicy {
    ReportPolicy::from_config(&AgentConfig::default())
}

#[test]
fn test_healthy_report_never_later_than_ceiling() {
    let policy = policy();
    let jitter = JitterPolicy::up_to(policy.max_jitter);
    let now = Utc::now();
    let last = Some((now - ChronoDuration::seconds(61), Outcome::Healthy));

    for _ in 0..200 {
        assert!(policy.should_report(Outcome::Healthy, last, now, jitter.sample()));
    }
}

#[test]
fn test_healthy_report_never_earlier_than_interval() {
    let policy = policy();
    let jitter = JitterPolicy::up_to(policy.max_jitter);
    let now = Utc::now();
    let last = Some((now - ChronoDuration::seconds(29), Outcome::Healthy));

    for _ in 0..200 {
        assert!(!policy.should_report(Outcome::Healthy, last, now, jitter.sample()));
    }
}

#[test]
fn test_jitter_window_between_interval_and_ceiling() {
    let policy = policy();
    let now = Utc::now();
    let last = Some((now - ChronoDuration::seconds(45), Outcome::Healthy));

    assert!(policy.should_report(Outcome::Healthy, last, now, Duration::from_secs(10)));
    assert!(!policy.should_report(Outcome::Healthy, last, now, Duration::from_secs(20)));
    // Oversized jitter is clamped to the configured maximum
    assert!(!policy.should_report(Outcome::Healthy, last, now, Duration::from_secs(3600)));
}

#[test]
fn test_failures_and_changes_always_report() {
    let policy = policy();
    let now = Utc::now();
    let recent = Some((now, Outcome::Healthy));

    assert!(policy.should_report(Outcome::Unreachable, recent, now, Duration::ZERO));
    assert!(policy.should_report(Outcome::Indeterminate, recent, now, Duration::ZERO));
    assert!(policy.should_report(
        Outcome::Healthy,
        Some((now, Outcome::Unreachable)),
        now,
        Duration::ZERO
    ));
    assert!(policy.should_report(Outcome::Healthy, None, now, Duration::ZERO));
}
