//! Transient source failures against the configured retry ceiling

use std::time::Duration;

use vigil_core::{FailureReason, ReconcilerConfig, SourceConfig, SourceError};
use vigil_test_utils::{alive, date, tracked, Harness, Reply, ScriptedFactSource};

fn flaky_then_ok() -> ScriptedFactSource {
    ScriptedFactSource::new().script(
        "Q-a",
        [
            Reply::Fail(SourceError::Unavailable("503".into())),
            Reply::Fail(SourceError::Timeout(Duration::from_secs(10))),
            Reply::Fail(SourceError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            }),
            Reply::Facts(alive(date(1970, 3, 3))),
        ],
    )
}

fn with_ceiling(max_retries: u32) -> ReconcilerConfig {
    ReconcilerConfig::default()
        .with_auto_chain(false, 0)
        .with_source(SourceConfig {
            max_retries,
            ..SourceConfig::default()
        })
}

#[tokio::test(start_paused = true)]
async fn three_failures_within_a_ceiling_of_three_succeed() {
    let h = Harness::builder()
        .config(with_ceiling(3))
        .records([tracked("a")])
        .source(flaky_then_ok())
        .build();

    let report = h.invoke(None).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.source.fetches("Q-a"), 4);
    assert_eq!(h.record("a").birth_date, Some(date(1970, 3, 3)));
}

#[tokio::test(start_paused = true)]
async fn three_failures_past_a_ceiling_of_two_fail_the_record() {
    let h = Harness::builder()
        .config(with_ceiling(2))
        .records([tracked("a"), tracked("b")])
        .source(flaky_then_ok().facts("Q-b", alive(date(1980, 1, 1))))
        .build();

    let report = h.invoke(None).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failures[0].reason, FailureReason::Transient);
    assert_eq!(h.source.fetches("Q-a"), 3);
    assert!(h.record("a").fingerprint.is_none());
}

#[tokio::test(start_paused = true)]
async fn rejected_requests_are_not_retried() {
    let source = ScriptedFactSource::new().script(
        "Q-a",
        [Reply::Fail(SourceError::Rejected("malformed id".into()))],
    );
    let h = Harness::builder()
        .config(with_ceiling(5))
        .records([tracked("a")])
        .source(source)
        .build();

    let report = h.invoke(None).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].reason, FailureReason::Rejected);
    assert_eq!(h.source.fetches("Q-a"), 1);
}
