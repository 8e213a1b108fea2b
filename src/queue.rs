use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

const VISIBILITY_EPSILON: f64 = 1e-3;

/// Display token that fades out after its time-to-live is consumed.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpiringFragment {
    text: String,
    ttl_sec: f64,
}

impl ExpiringFragment {
    pub fn new(text: impl Into<String>, ttl_sec: f64) -> Self {
        Self {
            text: text.into(),
            ttl_sec: ttl_sec.max(0.0),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ttl_sec(&self) -> f64 {
        self.ttl_sec
    }

    /// Consumes `frame_sec` of the remaining lifetime and reports whether the
    /// fragment is still visible afterwards.
    pub fn iterate(&mut self, frame_sec: f64) -> bool {
        self.ttl_sec = (self.ttl_sec - frame_sec).max(0.0);
        self.is_visible()
    }

    pub fn is_visible(&self) -> bool {
        self.ttl_sec > VISIBILITY_EPSILON
    }
}

/// Item of a [`RenderQueue`].
#[derive(Clone, Debug, PartialEq)]
pub enum Renderable {
    /// Shown for exactly one frame.
    Text(String),
    Fragment(ExpiringFragment),
}

impl Renderable {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Fragment(fragment) => fragment.text(),
        }
    }
}

impl fmt::Display for Renderable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// FIFO of renderables where only the head is looked at per frame.
///
/// Each call to [`RenderQueue::iterate`] is one frame: the wall-clock time
/// since the previous frame is charged against the head fragment.
#[derive(Debug)]
pub struct RenderQueue {
    items: VecDeque<Renderable>,
    prev_frame: Instant,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueue {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            prev_frame: Instant::now(),
        }
    }

    pub fn push(&mut self, item: Renderable) {
        self.items.push_back(item);
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.push(Renderable::Text(text.into()));
    }

    pub fn push_fragment(&mut self, text: impl Into<String>, ttl_sec: f64) {
        self.push(Renderable::Fragment(ExpiringFragment::new(text, ttl_sec)));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn head(&self) -> Option<&Renderable> {
        self.items.front()
    }

    /// Advances one frame using the wall clock.
    pub fn iterate(&mut self, pop: bool) -> Option<Renderable> {
        let now = Instant::now();
        let frame = now.saturating_duration_since(self.prev_frame);
        self.prev_frame = now;
        self.advance(frame, pop)
    }

    /// Advances one frame of the given duration.
    ///
    /// Returns the head item to render this frame. With `pop`, a head that will
    /// not be visible next frame is removed from the queue (and still returned).
    pub fn advance(&mut self, frame: Duration, pop: bool) -> Option<Renderable> {
        let head = self.items.front_mut()?;
        let visible_next_frame = match head {
            Renderable::Text(_) => false,
            Renderable::Fragment(fragment) => fragment.iterate(frame.as_secs_f64()),
        };
        if pop && !visible_next_frame {
            return self.items.pop_front();
        }
        self.items.front().cloned()
    }

    /// Removes and returns every queued item.
    pub fn drain(&mut self) -> impl Iterator<Item = Renderable> + '_ {
        self.items.drain(..)
    }
}
