//! Adaptive request controller: retries, backoff and post-request pacing.
//!
//! The controller runs one logical request at a time. Transport failures are
//! retried with a progressive backoff; rate-limited responses raise the
//! post-request delay (*stabilize*), and long runs without failures lower it
//! again (*optimize*). Every sleep is broken into one-second ticks so the
//! hooks can animate a countdown.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::{
    hooks::{DelayChange, NoopHooks, RequestFlowHooks},
    FlowError, FlowOptions, Result,
};

/// Retries after the first attempt; a request is tried at most `MAX_ATTEMPTS + 1` times.
pub const MAX_ATTEMPTS: u32 = 20;
/// Start lowering the delay after this many "minutes" (60 requests each) without failures.
pub const OPTIMIZE_THRESHOLD_MINUTES: f64 = 1.5;
pub const STABILIZE_STEP_SEC: f64 = 0.20;
pub const OPTIMIZE_STEP_SEC: f64 = 0.10;
pub const DELAY_FLOOR_SEC: f64 = 0.0;

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Outcome of one HTTP attempt as seen by the controller.
///
/// The controller never looks into `body`; it only needs the status, the
/// `Retry-After` hint and the body size.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion<T> {
    pub body: T,
    pub ok: bool,
    pub status: u16,
    /// `Retry-After` header value in seconds.
    pub retry_after: Option<f64>,
    pub size: u64,
}

impl<T> Completion<T> {
    /// Status codes below 400 count as ok.
    pub fn new(body: T, status: u16) -> Self {
        Self {
            body,
            ok: status < 400,
            status,
            retry_after: None,
            size: 0,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<f64>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// `Retry-After` seconds if this response is a rate-limit signal.
    pub fn rate_limit(&self) -> Option<f64> {
        if self.status == HTTP_TOO_MANY_REQUESTS {
            self.retry_after
        } else {
            None
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completion<U> {
        Completion {
            body: f(self.body),
            ok: self.ok,
            status: self.status,
            retry_after: self.retry_after,
            size: self.size,
        }
    }
}

/// Post-request delay clamped to a floor.
///
/// Updates closer than [`DelayState::TOLERANCE`] to the current value are
/// dropped, so the delay does not jitter around the floor.
#[derive(Clone, Debug, PartialEq)]
pub struct DelayState {
    seconds: f64,
    floor: f64,
}

impl Default for DelayState {
    fn default() -> Self {
        Self::new(DELAY_FLOOR_SEC)
    }
}

impl DelayState {
    pub const TOLERANCE: f64 = 1e-3;

    pub fn new(floor: f64) -> Self {
        let floor = floor.max(0.0);
        Self {
            seconds: floor,
            floor,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    pub fn is_at_floor(&self) -> bool {
        (self.seconds - self.floor).abs() <= Self::TOLERANCE
    }

    /// Returns `false` when the clamped value is within tolerance of the current one.
    pub fn set(&mut self, seconds: f64) -> bool {
        let seconds = seconds.max(self.floor);
        if (self.seconds - seconds).abs() <= Self::TOLERANCE {
            return false;
        }
        self.seconds = seconds;
        true
    }

    pub fn shift(&mut self, delta: f64) -> Option<DelayChange> {
        if delta < 0.0 && self.is_at_floor() {
            return None;
        }
        self.set(self.seconds + delta)
            .then(|| DelayChange::from_delta(delta))
    }

    pub fn reset(&mut self) {
        self.seconds = self.floor;
    }
}

/// Backoff applied after a transport failure, by attempt number.
#[derive(Clone, Debug, PartialEq)]
pub enum RetrySchedule {
    /// Cheap near-instant retries first, then roughly +10s per attempt.
    Progressive(Vec<f64>),
    /// Same backoff for every attempt.
    Static(f64),
}

impl RetrySchedule {
    pub const STATIC_BACKOFF_SEC: f64 = 30.0;

    pub fn progressive() -> Self {
        let mut steps = Vec::with_capacity(MAX_ATTEMPTS as usize + 1);
        steps.push(0.5);
        steps.extend((0..MAX_ATTEMPTS).map(|i| 1.2f64.powi(i as i32) + 10.0 * f64::from(i)));
        Self::Progressive(steps)
    }

    pub fn fixed() -> Self {
        Self::Static(Self::STATIC_BACKOFF_SEC)
    }

    pub fn for_options(options: &FlowOptions) -> Self {
        if options.adaptive {
            Self::progressive()
        } else {
            Self::fixed()
        }
    }

    /// Backoff in seconds for a 1-based attempt number.
    ///
    /// Attempts past the end of a progressive schedule reuse its last step.
    pub fn backoff_sec(&self, attempt: u32) -> f64 {
        match self {
            Self::Progressive(steps) => {
                let index = attempt.saturating_sub(1) as usize;
                steps
                    .get(index)
                    .or_else(|| steps.last())
                    .copied()
                    .unwrap_or(Self::STATIC_BACKOFF_SEC)
            }
            Self::Static(seconds) => *seconds,
        }
    }
}

/// Sliding window of completion timestamps, newest first.
#[derive(Clone, Debug)]
pub struct RpmWindow {
    samples: VecDeque<Instant>,
    capacity: usize,
}

impl Default for RpmWindow {
    fn default() -> Self {
        Self::with_capacity(Self::CAPACITY)
    }
}

impl RpmWindow {
    pub const CAPACITY: usize = 60;
    /// Fewer samples than this and the rate is unknown.
    pub const MIN_SAMPLES: usize = 6;

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, at: Instant) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_back();
        }
        self.samples.push_front(at);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Requests per minute over the window, `None` until enough samples exist.
    pub fn rpm(&self) -> Option<f64> {
        if self.samples.len() < Self::MIN_SAMPLES {
            return None;
        }
        let (newest, oldest) = (self.samples.front()?, self.samples.back()?);
        let span = newest.saturating_duration_since(*oldest).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        Some(60.0 * self.samples.len() as f64 / span)
    }
}

/// Drives retriable requests and paces them from server feedback.
pub struct AdaptiveRequestController<H = NoopHooks> {
    hooks: H,
    options: FlowOptions,
    schedule: RetrySchedule,
    delay: DelayState,
    rpm_window: RpmWindow,
    rpm: Option<f64>,
    successive: u32,
    request_num: u64,
    rpm_allowed_to_increase: bool,
}

impl AdaptiveRequestController<NoopHooks> {
    pub fn new(options: FlowOptions) -> Self {
        Self::with_hooks(options, NoopHooks)
    }
}

impl<H: RequestFlowHooks> AdaptiveRequestController<H> {
    pub fn with_hooks(options: FlowOptions, hooks: H) -> Self {
        Self {
            hooks,
            schedule: RetrySchedule::for_options(&options),
            options,
            delay: DelayState::default(),
            rpm_window: RpmWindow::default(),
            rpm: None,
            successive: 0,
            request_num: 0,
            rpm_allowed_to_increase: true,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn into_hooks(self) -> H {
        self.hooks
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    pub fn post_request_delay(&self) -> f64 {
        self.delay.seconds()
    }

    /// Current requests-per-minute estimate.
    pub fn rpm(&self) -> Option<f64> {
        self.rpm
    }

    /// Completions since the last failure or rate limit.
    pub fn successive_requests(&self) -> u32 {
        self.successive
    }

    /// One "minute" is 60 successful requests, not wall-clock time.
    pub fn minutes_without_failures(&self) -> f64 {
        f64::from(self.successive) / 60.0
    }

    pub fn request_num(&self) -> u64 {
        self.request_num
    }

    /// Resets pacing state and statistics before a new logical batch.
    pub fn reinit(&mut self, requests_estimated: Option<u64>) {
        self.hooks.reinit(requests_estimated);
        self.request_num = 0;
        self.successive = 0;
        self.rpm_window.clear();
        self.rpm = None;
        self.rpm_allowed_to_increase = true;
        self.delay.reset();
    }

    pub fn before_batch(&mut self, label: &str) {
        self.hooks.before_batch(label);
    }

    pub fn after_batch(&mut self) {
        self.hooks.after_batch();
    }

    /// Performs one logical request, retrying transport failures and rate limits.
    ///
    /// `attempt_fn` receives the 1-based attempt number. Its
    /// [`FlowError::Transport`] and [`FlowError::RateLimited`] errors are retried;
    /// any other error is returned as is. Completed responses other than a 429
    /// with a `Retry-After` hint are returned whatever their status.
    pub async fn perform<T, F, Fut>(&mut self, mut attempt_fn: F) -> Result<Completion<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Completion<T>>>,
    {
        self.request_num += 1;
        self.hooks.before_request(self.request_num);

        let mut attempt = 0;
        let mut last_error = None;
        while attempt <= MAX_ATTEMPTS {
            attempt += 1;
            let is_last = attempt > MAX_ATTEMPTS;
            self.hooks.before_attempt(attempt);

            match attempt_fn(attempt).await {
                Ok(completion) => {
                    self.record_completion(&completion);
                    match completion.rate_limit() {
                        Some(retry_after) => self.on_rate_limited(retry_after, is_last).await,
                        None => {
                            self.optimize().await;
                            return Ok(completion);
                        }
                    }
                }
                Err(FlowError::Transport(message)) => {
                    self.on_transport_failure(attempt, &message, is_last).await;
                    last_error = Some(message);
                }
                Err(FlowError::RateLimited { retry_after }) => {
                    let completion = Completion::new((), HTTP_TOO_MANY_REQUESTS)
                        .with_retry_after(Some(retry_after));
                    self.record_completion(&completion);
                    self.on_rate_limited(retry_after, is_last).await;
                }
                Err(err) => return Err(err),
            }
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            request = self.request_num,
            attempts = attempt,
            "retry budget exhausted"
        );

        Err(FlowError::RetryExhausted {
            attempts: attempt,
            last_error,
        })
    }

    async fn on_transport_failure(&mut self, attempt: u32, message: &str, is_last: bool) {
        self.hooks.on_failure(attempt, message);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            request = self.request_num,
            attempt,
            error = message,
            "request attempt failed"
        );

        self.successive = 0;
        if is_last {
            return;
        }

        let backoff = self.schedule.backoff_sec(attempt);
        self.hooks.before_sleep(backoff);
        self.sleep_ticking(backoff).await;
        self.hooks.after_sleep();
    }

    async fn on_rate_limited(&mut self, retry_after: f64, is_last: bool) {
        let retry_after = retry_after.max(0.0);
        self.stabilize(retry_after);
        if is_last {
            return;
        }

        self.hooks.before_sleep(retry_after);
        self.sleep_ticking(retry_after + self.delay.seconds()).await;
        self.hooks.after_sleep();
    }

    fn record_completion<T>(&mut self, completion: &Completion<T>) {
        self.rpm_window.push(Instant::now());
        self.rpm = self.rpm_window.rpm();

        self.hooks
            .update_statistics(completion.ok, completion.size, self.rpm);
        self.hooks
            .on_completion(completion.ok, &completion.status.to_string());
    }

    /// Raises the delay toward (and slightly under) what the server asks for.
    fn stabilize(&mut self, retry_after: f64) {
        self.successive = 0;
        if !self.options.adaptive {
            return;
        }

        let delta = retry_after - self.delay.seconds();
        let step = if delta - STABILIZE_STEP_SEC > DelayState::TOLERANCE {
            delta - STABILIZE_STEP_SEC
        } else {
            STABILIZE_STEP_SEC
        };
        self.shift_delay(step);
    }

    /// Lowers the delay after a long enough run without failures, then
    /// sleeps for the current post-request delay.
    async fn optimize(&mut self) {
        if !self.options.adaptive {
            return;
        }

        self.apply_rpm_limit();
        self.successive += 1;
        if self.minutes_without_failures() >= OPTIMIZE_THRESHOLD_MINUTES
            && self.rpm_allowed_to_increase
        {
            self.shift_delay(-OPTIMIZE_STEP_SEC);
            self.successive = 0;
        }

        let delay = self.delay.seconds();
        if delay > 0.0 {
            sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    /// Extension point for the `max_rpm` cap.
    ///
    /// The cap is only stored; no throttling policy is enforced yet.
    fn apply_rpm_limit(&mut self) {
        self.rpm_allowed_to_increase = true;
    }

    fn shift_delay(&mut self, delta: f64) {
        let Some(change) = self.delay.shift(delta) else {
            return;
        };
        let delay = self.delay.seconds();
        self.hooks.on_delay_changed(change, delay);
        self.hooks
            .print_event(&format!("Set post-request delay to {delay:.2}s"), true);

        #[cfg(feature = "tracing")]
        tracing::info!(delay_sec = delay, "post-request delay changed");
    }

    async fn sleep_ticking(&mut self, seconds: f64) {
        let mut left = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };
        while left > 1.0 {
            self.hooks.sleep_tick(left);
            left -= 1.0;
            sleep(Duration::from_secs(1)).await;
        }
        sleep(Duration::from_secs_f64(left)).await;
    }
}
