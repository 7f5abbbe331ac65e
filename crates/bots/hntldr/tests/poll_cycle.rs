//! Poll cycle against mocked collaborators and a real database

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{CHANNEL, TestHarness, make_item};
use hntldr::poll::{
    CandidateOutcome, PollConfig, process_candidate, run_poll_cycle, run_poll_scheduler,
};
use hntldr::topic::{ScoreThreshold, Topic};
use hntldr_db::Phase;
use time::OffsetDateTime;

fn test_config() -> PollConfig {
    PollConfig {
        publish_delay: Duration::ZERO,
        ..PollConfig::default()
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn publishes_items_above_their_category_threshold() {
    let h = TestHarness::new().await;
    *h.source.items.lock().await = vec![
        make_item("1", "A popular story", 150),
        make_item("2", "A quiet story", 99),
        make_item("3", "Show HN: My weekend project", 60),
        make_item("4", "Ask HN: How do you sleep?", 40),
    ];

    let summary = run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;

    assert_eq!(summary.candidates, 4);
    assert_eq!(summary.published, 2);
    assert_eq!(summary.below_threshold, 2);
    assert_eq!(summary.failed, 0);
    assert!(!summary.cycle_failed);

    let published: Vec<_> = h
        .publisher
        .published
        .lock()
        .await
        .iter()
        .map(|(content, _, _)| content.item_id.clone())
        .collect();
    assert_eq!(published, vec!["1".to_string(), "3".to_string()]);

    assert!(h.db.has_been_posted("1").await.unwrap());
    assert!(h.db.has_been_posted("3").await.unwrap());
    assert!(!h.db.has_been_posted("2").await.unwrap());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn disabled_category_is_never_published() {
    let h = TestHarness::new().await;
    let mut job = make_item("7", "Acme is hiring", 10_000);
    job.topic = Topic::Jobs;
    *h.source.items.lock().await = vec![job];

    let summary = run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;
    assert_eq!(summary.published, 0);
    assert_eq!(summary.below_threshold, 1);

    let outcome = process_candidate(
        &h.ctx(),
        &test_config(),
        &h.source.items.lock().await[0].clone(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, CandidateOutcome::CategoryDisabled);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn threshold_override_changes_admission() {
    let h = TestHarness::new().await;
    *h.source.items.lock().await = vec![make_item("1", "Show HN: Tiny thing", 20)];

    let mut config = test_config();
    config.thresholds.show_hn = ScoreThreshold::Min(10);

    let summary = run_poll_cycle(&h.ctx(), &config, &mut h.cancel_rx()).await;
    assert_eq!(summary.published, 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn stops_after_max_per_cycle() {
    let h = TestHarness::new().await;
    *h.source.items.lock().await = (1..=6)
        .map(|i| make_item(&i.to_string(), &format!("Story {i}"), 500))
        .collect();

    let summary = run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;
    assert_eq!(summary.published, 3);
    assert_eq!(h.publisher.published.lock().await.len(), 3);

    // The rest goes out on the next cycle
    let summary = run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;
    assert_eq!(summary.published, 3);
    assert_eq!(summary.already_posted, 3);
    assert_eq!(h.db.posted_count().await.unwrap(), 6);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn already_posted_items_are_skipped() {
    let h = TestHarness::new().await;
    h.db
        .mark_posted("1", "Old story", 300, OffsetDateTime::now_utc())
        .await
        .unwrap();
    *h.source.items.lock().await = vec![make_item("1", "Old story", 300)];

    let summary = run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;
    assert_eq!(summary.already_posted, 1);
    assert_eq!(summary.published, 0);
    assert!(h.publisher.published.lock().await.is_empty());
    assert!(h.synthesizer.requests.lock().await.is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn publish_creates_update_task_with_initial_metrics() {
    let h = TestHarness::new().await;
    let mut item = make_item("42", "Rust 2.0 released", 250);
    item.comment_count = 77;
    *h.source.items.lock().await = vec![item];

    run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;

    let task = h.db.get_update_task("42").await.unwrap().expect("task");
    assert_eq!(task.score, 250);
    assert_eq!(task.comment_count, 77);
    assert_eq!(task.update_count, 0);
    assert_eq!(task.phase, Phase::Fast);
    assert_eq!(task.hook, "Hook for Rust 2.0 released");
    assert_eq!(task.message_ref.chat_id, CHANNEL);
    assert_eq!(task.source_url.as_deref(), Some("https://example.com/42"));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn publish_failure_is_reported_and_cycle_continues() {
    let h = TestHarness::new().await;
    h.publisher.fail_publish.lock().await.insert("1".into());
    *h.source.items.lock().await = vec![
        make_item("1", "Broken story", 500),
        make_item("2", "Fine story", 500),
    ];

    let summary = run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.published, 1);

    // Failed item is not marked, so a later cycle retries it
    assert!(!h.db.has_been_posted("1").await.unwrap());
    assert!(h.db.get_update_task("1").await.unwrap().is_none());

    let reports = h.notifier.reports.lock().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].1.ends_with("item 1"));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn source_failure_is_reported_and_ledger_still_pruned() {
    let h = TestHarness::new().await;
    let long_ago = OffsetDateTime::now_utc() - Duration::from_secs(40 * 24 * 60 * 60);
    h.db.mark_posted("old", "Ancient", 100, long_ago).await.unwrap();
    h.db
        .mark_posted("new", "Recent", 100, OffsetDateTime::now_utc())
        .await
        .unwrap();
    h.source.fail.store(true, Ordering::SeqCst);

    let summary = run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;
    assert!(summary.cycle_failed);
    assert_eq!(summary.pruned, 1);
    assert!(!h.db.has_been_posted("old").await.unwrap());
    assert!(h.db.has_been_posted("new").await.unwrap());
    assert_eq!(h.notifier.reports.lock().await.len(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn linkless_item_without_text_gets_empty_hook() {
    let h = TestHarness::new().await;
    let mut item = make_item("5", "Ask HN: Thoughts?", 200);
    item.url = None;
    item.body_text = "Short.".into();
    *h.source.items.lock().await = vec![item];

    run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;

    assert!(h.synthesizer.requests.lock().await.is_empty());
    let published = h.publisher.published.lock().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0.hook, "");
    assert_eq!(published[0].0.url, None);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn synthesis_falls_back_to_item_text_when_article_is_empty() {
    let h = TestHarness::new().await;
    let mut item = make_item("6", "Tell HN: Something happened", 200);
    item.body_text = "Long body text. ".repeat(20);
    *h.source.items.lock().await = vec![item.clone()];

    run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;

    let requests = h.synthesizer.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].content, item.body_text);

    drop(requests);
    *h.fetcher.article_text.lock().await = "Scraped article".into();
    h.synthesizer.requests.lock().await.clear();
    let mut other = item;
    other.id = "8".into();
    *h.source.items.lock().await = vec![other];
    run_poll_cycle(&h.ctx(), &test_config(), &mut h.cancel_rx()).await;
    assert_eq!(h.synthesizer.requests.lock().await[0].content, "Scraped article");
}

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn publishes_are_spaced_by_publish_delay() {
    let h = TestHarness::new().await;
    *h.source.items.lock().await = (1..=3)
        .map(|i| make_item(&i.to_string(), &format!("Story {i}"), 500))
        .collect();
    let config = PollConfig {
        publish_delay: Duration::from_millis(150),
        ..PollConfig::default()
    };

    let summary = run_poll_cycle(&h.ctx(), &config, &mut h.cancel_rx()).await;
    assert_eq!(summary.published, 3);

    let times = h.publisher.publish_times.lock().await;
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(config.publish_delay <= pair[1] - pair[0]);
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn cancel_cuts_publish_delay_short() {
    let h = TestHarness::new().await;
    *h.source.items.lock().await = (1..=3)
        .map(|i| make_item(&i.to_string(), &format!("Story {i}"), 500))
        .collect();
    let config = PollConfig {
        publish_delay: Duration::from_secs(60),
        ..PollConfig::default()
    };

    let ctx = h.ctx();
    let mut cancel = h.cancel_rx();
    let cycle = tokio::spawn(async move { run_poll_cycle(&ctx, &config, &mut cancel).await });

    let deadline = Instant::now() + WAIT_LIMIT;
    while h.publisher.published.lock().await.is_empty() {
        assert!(Instant::now() < deadline, "nothing was published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.cancel();

    let summary = tokio::time::timeout(WAIT_LIMIT, cycle)
        .await
        .expect("cycle ends soon after cancel")
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.published, 1);
    assert_eq!(h.publisher.published.lock().await.len(), 1);
    assert_eq!(h.db.posted_count().await.unwrap(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn scheduler_runs_once_at_startup_then_on_interval() {
    let h = TestHarness::new().await;
    let config = PollConfig {
        startup_delay: Duration::from_millis(50),
        interval: Duration::from_millis(300),
        ..test_config()
    };

    let start = Instant::now();
    let scheduler = tokio::spawn(run_poll_scheduler(h.ctx(), config.clone(), h.cancel_rx()));

    // Startup run only; the first interval tick is still ahead
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.source.calls.lock().await.len(), 1);

    let deadline = Instant::now() + WAIT_LIMIT;
    while h.source.calls.lock().await.len() < 3 {
        assert!(Instant::now() < deadline, "interval runs did not happen");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    {
        let calls = h.source.calls.lock().await;
        assert!(config.startup_delay <= calls[0] - start);
        assert!(config.interval <= calls[1] - start);
        assert!(Duration::from_millis(250) <= calls[2] - calls[1]);
    }

    h.cancel();
    tokio::time::timeout(WAIT_LIMIT, scheduler)
        .await
        .expect("scheduler stops after cancel")
        .unwrap();

    let runs = h.source.calls.lock().await.len();
    tokio::time::sleep(config.interval + Duration::from_millis(100)).await;
    assert_eq!(h.source.calls.lock().await.len(), runs);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn scheduler_cancelled_during_startup_delay_never_polls() {
    let h = TestHarness::new().await;
    let config = PollConfig {
        startup_delay: Duration::from_secs(60),
        ..test_config()
    };

    let scheduler = tokio::spawn(run_poll_scheduler(h.ctx(), config, h.cancel_rx()));
    h.cancel();

    tokio::time::timeout(WAIT_LIMIT, scheduler)
        .await
        .expect("scheduler stops after cancel")
        .unwrap();
    assert!(h.source.calls.lock().await.is_empty());
}
