//! Prometheus-compatible coordinator metrics
//!
//! Recorded through the `metrics` facade; the binary installs the exporter.

use metrics::{counter, gauge};

pub fn record_invitation_dispatched() {
    counter!("cv_invitations_dispatched_total").increment(1);
}

pub fn record_addressed_copy_published() {
    counter!("cv_addressed_copies_published_total").increment(1);
}

/// `kind` is `invitation`, `echo` or `response`
pub fn record_duplicate_ignored(kind: &'static str) {
    counter!("cv_duplicates_ignored_total", "kind" => kind).increment(1);
}

/// `kind` is `invitation` or `response`
pub fn record_unknown_workflow_dropped(kind: &'static str) {
    counter!("cv_unknown_workflow_dropped_total", "kind" => kind).increment(1);
}

pub fn record_response_recorded() {
    counter!("cv_responses_recorded_total").increment(1);
}

pub fn record_summary_published() {
    counter!("cv_summaries_published_total").increment(1);
}

/// Update the number of workflows awaiting responses
pub fn set_active_workflows(count: usize) {
    gauge!("cv_active_workflows").set(count as f64);
}

pub fn record_consumer_poll(topic: &str) {
    counter!("cv_consumer_polls_total", "topic" => topic.to_string()).increment(1);
}

pub fn record_poison_message(topic: &str) {
    counter!("cv_poison_messages_total", "topic" => topic.to_string()).increment(1);
}
