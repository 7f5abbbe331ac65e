//! Operator error reports, deduplicated over a bounded recent window.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use data_encoding::HEXLOWER;
use tracing::{debug, error, warn};

use crate::PROJECT_NAME;
use crate::error::FmtCompact as _;
use crate::publisher::PublishResult;
use crate::render::escape_html;

const LOG_TARGET: &str = "hntldr::notifier";

pub const REPORT_DEDUP_TTL: Duration = Duration::from_secs(60 * 60);
pub const REPORT_DEDUP_CAPACITY: usize = 1000;
const MAX_REPORT_CHARS: usize = 1500;

#[async_trait::async_trait]
pub trait OperatorNotifier: Send + Sync {
    /// Fire-and-forget: failures to deliver are logged, never returned
    async fn report(&self, message: &str, context: &str);
}

/// Where admin reports are delivered
#[async_trait::async_trait]
pub trait NotifySink: Send + Sync {
    async fn send_direct(&self, user_id: i64, html: &str) -> PublishResult<()>;
}

#[async_trait::async_trait]
impl<T> NotifySink for Arc<T>
where
    T: NotifySink + ?Sized,
{
    async fn send_direct(&self, user_id: i64, html: &str) -> PublishResult<()> {
        (**self).send_direct(user_id, html).await
    }
}

pub fn report_key(message: &str, context: &str) -> String {
    let hash = blake3::hash(format!("{context}\n{message}").as_bytes());
    HEXLOWER.encode(&hash.as_bytes()[..8])
}

/// Remembers recently sent report keys
#[derive(Debug)]
pub struct ReportDedup {
    ttl: Duration,
    capacity: usize,
    sent: BTreeMap<String, Instant>,
}

impl Default for ReportDedup {
    fn default() -> Self {
        Self::new(REPORT_DEDUP_TTL, REPORT_DEDUP_CAPACITY)
    }
}

impl ReportDedup {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            sent: BTreeMap::new(),
        }
    }

    /// Record `key` and return whether it was not seen within the ttl
    pub fn should_send(&mut self, key: &str, now: Instant) -> bool {
        let ttl = self.ttl;
        self.sent
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) <= ttl);

        if self.sent.contains_key(key) {
            return false;
        }
        self.sent.insert(key.to_owned(), now);

        while self.capacity < self.sent.len() {
            let Some(oldest) = self
                .sent
                .iter()
                .min_by_key(|(_, sent_at)| **sent_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.sent.remove(&oldest);
        }
        true
    }
}

pub fn format_report(message: &str, context: &str) -> String {
    let context = if context.is_empty() {
        String::new()
    } else {
        format!("\n<b>Context:</b> {}", escape_html(context))
    };
    let message: String = message.chars().take(MAX_REPORT_CHARS).collect();
    format!(
        "<b>{PROJECT_NAME} error</b>{context}\n<pre>{}</pre>",
        escape_html(&message)
    )
}

/// Logs every report and DMs it to each admin, at most once per ttl
pub struct AdminNotifier<S> {
    sink: S,
    admin_ids: Vec<i64>,
    dedup: Mutex<ReportDedup>,
}

impl<S> AdminNotifier<S> {
    pub fn new(sink: S, admin_ids: Vec<i64>) -> Self {
        Self {
            sink,
            admin_ids,
            dedup: Mutex::new(ReportDedup::default()),
        }
    }
}

#[async_trait::async_trait]
impl<S> OperatorNotifier for AdminNotifier<S>
where
    S: NotifySink,
{
    async fn report(&self, message: &str, context: &str) {
        error!(target: LOG_TARGET, %context, %message, "Operator report");

        if self.admin_ids.is_empty() {
            return;
        }

        let key = report_key(message, context);
        let fresh = match self.dedup.lock() {
            Ok(mut dedup) => dedup.should_send(&key, Instant::now()),
            Err(poisoned) => poisoned.into_inner().should_send(&key, Instant::now()),
        };
        if !fresh {
            debug!(target: LOG_TARGET, %key, "Suppressing duplicate report");
            return;
        }

        let text = format_report(message, context);
        for admin_id in &self.admin_ids {
            if let Err(err) = self.sink.send_direct(*admin_id, &text).await {
                warn!(target: LOG_TARGET, admin_id, err = %err.fmt_compact(), "Failed to notify admin");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<(i64, String)>>>,
    }

    #[async_trait::async_trait]
    impl NotifySink for RecordingSink {
        async fn send_direct(&self, user_id: i64, html: &str) -> PublishResult<()> {
            self.sent.lock().unwrap().push((user_id, html.to_owned()));
            Ok(())
        }
    }

    #[test]
    fn key_depends_on_context_and_message() {
        assert_eq!(report_key("boom", "poll"), report_key("boom", "poll"));
        assert_ne!(report_key("boom", "poll"), report_key("boom", "worker"));
        assert_eq!(report_key("boom", "poll").len(), 16);
    }

    #[test]
    fn dedup_expires_after_ttl() {
        let mut dedup = ReportDedup::new(Duration::from_secs(10), 100);
        let t0 = Instant::now();
        assert!(dedup.should_send("a", t0));
        assert!(!dedup.should_send("a", t0 + Duration::from_secs(10)));
        assert!(dedup.should_send("a", t0 + Duration::from_secs(21)));
    }

    #[test]
    fn dedup_evicts_oldest_over_capacity() {
        let mut dedup = ReportDedup::new(Duration::from_secs(3600), 2);
        let t0 = Instant::now();
        assert!(dedup.should_send("a", t0));
        assert!(dedup.should_send("b", t0 + Duration::from_secs(1)));
        assert!(dedup.should_send("c", t0 + Duration::from_secs(2)));
        assert_eq!(dedup.sent.len(), 2);
        assert!(dedup.should_send("a", t0 + Duration::from_secs(3)));
        assert!(!dedup.should_send("c", t0 + Duration::from_secs(4)));
    }

    #[test]
    fn report_is_escaped_and_truncated() {
        let text = format_report(&"<".repeat(2000), "ctx & more");
        assert!(text.starts_with("<b>hntldr error</b>\n<b>Context:</b> ctx &amp; more\n<pre>"));
        assert_eq!(text.matches("&lt;").count(), 1500);
        assert_eq!(format_report("x", ""), "<b>hntldr error</b>\n<pre>x</pre>");
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn sends_each_report_once_to_every_admin() {
        let sink = RecordingSink::default();
        let notifier = AdminNotifier::new(sink.clone(), vec![1, 2]);

        notifier.report("boom", "poll").await;
        notifier.report("boom", "poll").await;
        notifier.report("boom", "worker").await;

        let sent = sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].0, 1);
        assert_eq!(sent[1].0, 2);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn no_admins_only_logs() {
        let sink = RecordingSink::default();
        let notifier = AdminNotifier::new(sink.clone(), vec![]);
        notifier.report("boom", "poll").await;
        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
