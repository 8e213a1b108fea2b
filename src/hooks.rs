//! Event hooks the request controller fires while it works.
//!
//! The controller decides *what happened*; an implementation of
//! [`RequestFlowHooks`] decides how (and whether) it is shown. Every hook is a
//! fire-and-forget notification with a no-op default, so implementors only
//! override the events they care about.

/// Direction of a post-request delay change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayChange {
    Increased,
    Decreased,
    Unchanged,
}

impl DelayChange {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Self::Increased
        } else if delta < 0.0 {
            Self::Decreased
        } else {
            Self::Unchanged
        }
    }
}

#[allow(unused_variables)]
pub trait RequestFlowHooks {
    /// A new logical batch is about to start; all statistics are reset.
    fn reinit(&mut self, requests_estimated: Option<u64>) {}
    fn before_batch(&mut self, label: &str) {}
    fn after_batch(&mut self) {}
    /// `request_num` is 1-based within the current batch.
    fn before_request(&mut self, request_num: u64) {}
    /// `attempt` is 1-based within the current request.
    fn before_attempt(&mut self, attempt: u32) {}
    fn on_failure(&mut self, attempt: u32, message: &str) {}
    /// Called for every received response before [`on_completion`](Self::on_completion).
    fn update_statistics(&mut self, ok: bool, size: u64, rpm: Option<f64>) {}
    fn on_completion(&mut self, ok: bool, status: &str) {}
    fn before_sleep(&mut self, seconds: f64) {}
    fn sleep_tick(&mut self, seconds_left: f64) {}
    fn after_sleep(&mut self) {}
    fn on_delay_changed(&mut self, change: DelayChange, delay_sec: f64) {}
    /// Free-form status message; `persist` asks for a line of its own.
    fn print_event(&mut self, message: &str, persist: bool) {}
}

/// Hooks that ignore every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl RequestFlowHooks for NoopHooks {}

impl<H: RequestFlowHooks + ?Sized> RequestFlowHooks for Box<H> {
    fn reinit(&mut self, requests_estimated: Option<u64>) {
        (**self).reinit(requests_estimated);
    }

    fn before_batch(&mut self, label: &str) {
        (**self).before_batch(label);
    }

    fn after_batch(&mut self) {
        (**self).after_batch();
    }

    fn before_request(&mut self, request_num: u64) {
        (**self).before_request(request_num);
    }

    fn before_attempt(&mut self, attempt: u32) {
        (**self).before_attempt(attempt);
    }

    fn on_failure(&mut self, attempt: u32, message: &str) {
        (**self).on_failure(attempt, message);
    }

    fn update_statistics(&mut self, ok: bool, size: u64, rpm: Option<f64>) {
        (**self).update_statistics(ok, size, rpm);
    }

    fn on_completion(&mut self, ok: bool, status: &str) {
        (**self).on_completion(ok, status);
    }

    fn before_sleep(&mut self, seconds: f64) {
        (**self).before_sleep(seconds);
    }

    fn sleep_tick(&mut self, seconds_left: f64) {
        (**self).sleep_tick(seconds_left);
    }

    fn after_sleep(&mut self) {
        (**self).after_sleep();
    }

    fn on_delay_changed(&mut self, change: DelayChange, delay_sec: f64) {
        (**self).on_delay_changed(change, delay_sec);
    }

    fn print_event(&mut self, message: &str, persist: bool) {
        (**self).print_event(message, persist);
    }
}
