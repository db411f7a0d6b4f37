use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramTimer, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::warn;

use crate::config::MetricsConfig;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    enabled: bool,

    // Sharing metrics
    pub splits_total: IntCounter,
    pub combines_total: IntCounter,
    pub combine_failures_total: IntCounterVec,

    // Distribution metrics
    pub shares_distributed_total: IntCounter,
    pub distribution_failures_total: IntCounter,
    pub distribution_retries_total: IntCounter,
    pub distribution_duration: Histogram,

    // Recovery metrics
    pub recovery_requests_total: IntCounter,
    pub recovery_request_send_failures_total: IntCounter,
    pub recovery_responses_total: IntCounterVec,
    pub recoveries_completed_total: IntCounter,
    pub recoveries_expired_total: IntCounter,
    pub active_recoveries: IntGauge,
    pub parked_responses: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let splits_total = IntCounter::new(
            "sharekeeper_splits_total",
            "Total number of secrets split into shares",
        )?;
        registry.register(Box::new(splits_total.clone()))?;

        let combines_total = IntCounter::new(
            "sharekeeper_combines_total",
            "Total number of successful reconstructions",
        )?;
        registry.register(Box::new(combines_total.clone()))?;

        let combine_failures_total = IntCounterVec::new(
            Opts::new(
                "sharekeeper_combine_failures_total",
                "Failed reconstructions by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(combine_failures_total.clone()))?;

        let shares_distributed_total = IntCounter::new(
            "sharekeeper_shares_distributed_total",
            "Shares published to at least one relay",
        )?;
        registry.register(Box::new(shares_distributed_total.clone()))?;

        let distribution_failures_total = IntCounter::new(
            "sharekeeper_distribution_failures_total",
            "Shares that could not be published after all attempts",
        )?;
        registry.register(Box::new(distribution_failures_total.clone()))?;

        let distribution_retries_total = IntCounter::new(
            "sharekeeper_distribution_retries_total",
            "Publish attempts beyond the first",
        )?;
        registry.register(Box::new(distribution_retries_total.clone()))?;

        let distribution_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sharekeeper_distribution_duration_seconds",
                "Time taken to fan a split out to every key holder",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(distribution_duration.clone()))?;

        let recovery_requests_total = IntCounter::new(
            "sharekeeper_recovery_requests_total",
            "Recovery requests initiated",
        )?;
        registry.register(Box::new(recovery_requests_total.clone()))?;

        let recovery_request_send_failures_total = IntCounter::new(
            "sharekeeper_recovery_request_send_failures_total",
            "Recovery request messages that no relay accepted",
        )?;
        registry.register(Box::new(recovery_request_send_failures_total.clone()))?;

        let recovery_responses_total = IntCounterVec::new(
            Opts::new(
                "sharekeeper_recovery_responses_total",
                "Recovery responses recorded by decision",
            ),
            &["decision"],
        )?;
        registry.register(Box::new(recovery_responses_total.clone()))?;

        let recoveries_completed_total = IntCounter::new(
            "sharekeeper_recoveries_completed_total",
            "Recovery requests that reached their threshold",
        )?;
        registry.register(Box::new(recoveries_completed_total.clone()))?;

        let recoveries_expired_total = IntCounter::new(
            "sharekeeper_recoveries_expired_total",
            "Recovery requests that expired before reaching their threshold",
        )?;
        registry.register(Box::new(recoveries_expired_total.clone()))?;

        let active_recoveries = IntGauge::new(
            "sharekeeper_active_recoveries",
            "Recovery requests currently awaiting responses",
        )?;
        registry.register(Box::new(active_recoveries.clone()))?;

        let parked_responses = IntGauge::new(
            "sharekeeper_parked_responses",
            "Responses held until their request is known locally",
        )?;
        registry.register(Box::new(parked_responses.clone()))?;

        Ok(Self {
            registry,
            enabled: true,
            splits_total,
            combines_total,
            combine_failures_total,
            shares_distributed_total,
            distribution_failures_total,
            distribution_retries_total,
            distribution_duration,
            recovery_requests_total,
            recovery_request_send_failures_total,
            recovery_responses_total,
            recoveries_completed_total,
            recoveries_expired_total,
            active_recoveries,
            parked_responses,
        })
    }

    /// Metrics still count when disabled; only exposition is suppressed.
    pub fn from_config(config: &MetricsConfig) -> prometheus::Result<Self> {
        let mut metrics = Self::new()?;
        metrics.enabled = config.enabled;
        Ok(metrics)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn split_performed(&self) {
        self.splits_total.inc();
    }

    pub fn combine_succeeded(&self) {
        self.combines_total.inc();
    }

    pub fn combine_failed(&self, reason: &str) {
        self.combine_failures_total.with_label_values(&[reason]).inc();
    }

    pub fn distribution_started(&self) -> HistogramTimer {
        self.distribution_duration.start_timer()
    }

    pub fn share_published(&self, attempts: u32) {
        self.shares_distributed_total.inc();
        self.distribution_retries_total
            .inc_by(u64::from(attempts.saturating_sub(1)));
    }

    pub fn share_failed(&self, attempts: u32) {
        self.distribution_failures_total.inc();
        self.distribution_retries_total
            .inc_by(u64::from(attempts.saturating_sub(1)));
    }

    pub fn recovery_initiated(&self) {
        self.recovery_requests_total.inc();
        self.active_recoveries.inc();
    }

    pub fn recovery_imported(&self) {
        self.active_recoveries.inc();
    }

    pub fn recovery_request_send_failed(&self) {
        self.recovery_request_send_failures_total.inc();
    }

    pub fn response_recorded(&self, approved: bool) {
        let decision = if approved { "approved" } else { "denied" };
        self.recovery_responses_total
            .with_label_values(&[decision])
            .inc();
    }

    pub fn recovery_completed(&self) {
        self.recoveries_completed_total.inc();
        self.active_recoveries.dec();
    }

    pub fn recovery_expired(&self) {
        self.recoveries_expired_total.inc();
        self.active_recoveries.dec();
    }

    pub fn set_parked_responses(&self, count: usize) {
        self.parked_responses.set(count as i64);
    }

    /// Prometheus text exposition of every registered metric
    pub fn gather_text(&self) -> String {
        if !self.enabled {
            return String::new();
        }
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
