//! Hooks that report the request sequence as structured `tracing` events.
//!
//! Useful when output is not a terminal (CI logs, services) where a live
//! status line would only produce noise.

use crate::hooks::{DelayChange, RequestFlowHooks};
use crate::sgr::strip_sgr;

const TARGET: &str = "request_flow";

/// Emits one `tracing` event per interesting hook call.
#[derive(Debug, Default)]
pub struct TracingHooks {
    label: Option<String>,
    requests_estimated: Option<u64>,
    request: u64,
    attempt: u32,
    successful: u64,
    size_total: u64,
    rpm: Option<f64>,
}

impl TracingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful
    }

    pub fn size_total(&self) -> u64 {
        self.size_total
    }
}

impl RequestFlowHooks for TracingHooks {
    fn reinit(&mut self, requests_estimated: Option<u64>) {
        *self = Self {
            label: self.label.take(),
            requests_estimated,
            ..Self::default()
        };
    }

    fn before_batch(&mut self, label: &str) {
        self.label = Some(label.to_owned());
        tracing::info!(
            target: TARGET,
            batch = label,
            estimated = ?self.requests_estimated,
            "batch started"
        );
    }

    fn after_batch(&mut self) {
        tracing::info!(
            target: TARGET,
            batch = ?self.label,
            requests = self.request,
            successful = self.successful,
            size = self.size_total,
            "batch finished"
        );
    }

    fn before_request(&mut self, request_num: u64) {
        self.request = request_num;
    }

    fn before_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
        if attempt > 1 {
            tracing::debug!(target: TARGET, request = self.request, attempt, "retrying request");
        }
    }

    fn on_failure(&mut self, attempt: u32, message: &str) {
        tracing::warn!(
            target: TARGET,
            request = self.request,
            attempt,
            error = message,
            "request attempt failed"
        );
    }

    fn update_statistics(&mut self, ok: bool, size: u64, rpm: Option<f64>) {
        if ok {
            self.successful += 1;
            self.size_total += size;
        }
        if rpm.is_some() {
            self.rpm = rpm;
        }
    }

    fn on_completion(&mut self, ok: bool, status: &str) {
        if ok {
            tracing::debug!(
                target: TARGET,
                request = self.request,
                attempt = self.attempt,
                status,
                size = self.size_total,
                rpm = ?self.rpm,
                "request completed"
            );
        } else {
            tracing::warn!(
                target: TARGET,
                request = self.request,
                attempt = self.attempt,
                status,
                "request completed with error status"
            );
        }
    }

    fn before_sleep(&mut self, seconds: f64) {
        tracing::debug!(target: TARGET, request = self.request, seconds, "sleeping before retry");
    }

    fn on_delay_changed(&mut self, change: DelayChange, delay_sec: f64) {
        tracing::info!(target: TARGET, ?change, delay = delay_sec, "post-request delay changed");
    }

    fn print_event(&mut self, message: &str, persist: bool) {
        let message = strip_sgr(message);
        if persist {
            tracing::info!(target: TARGET, request = self.request, "{message}");
        } else {
            tracing::trace!(target: TARGET, request = self.request, "{message}");
        }
    }
}
