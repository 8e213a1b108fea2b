//! Compact live rendering of long request sequences.
//!
//! One terminal line is kept "live" and rewritten in place for every request.
//! It becomes a real scrollback line after a failed response, whenever an
//! event asks to be persisted, and every `persist_every` requests (once the
//! following request starts, so retries of the N-th one still animate it).

use std::io::{self, Stdout, Write};

use crate::{
    format::{format_auto_float, format_duration, format_size},
    hooks::{DelayChange, RequestFlowHooks},
    progress::BackgroundProgressBar,
    queue::{RenderQueue, Renderable},
    sgr::{self, visible_width, SgrSequence},
    FlowOptions,
};

const INDENT: &str = "   ";
const MARKER_TTL_SEC: f64 = 3.0;
const SEPARATOR_MAX_WIDTH: usize = 80;
const FALLBACK_TERMINAL_WIDTH: usize = 80;
const GRAY: u8 = 37;
/// Largest RPM that fits the 4-character cell.
const MAX_DISPLAYED_RPM: f64 = 9999.0;

/// Columns available for drawing, two less than the terminal reports.
pub fn terminal_width() -> usize {
    crossterm::terminal::size()
        .ok()
        .map(|(columns, _)| usize::from(columns).saturating_sub(2))
        .filter(|width| *width > 0)
        .unwrap_or(FALLBACK_TERMINAL_WIDTH)
}

/// How much of the live line has been drawn this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPhase {
    /// Nothing printed on the current line.
    Blank,
    Partial,
    /// Every column is drawn; the line may be patched in place.
    Complete,
}

/// Terminal renderer for a sequence of requests.
///
/// The status line has fixed-width columns: liveness glyph, request number
/// with retry and wait markers, HTTP status, progress, ETA, requests per
/// minute and downloaded size.
pub struct SequenceRenderer<W: Write = Stdout> {
    out: W,
    terminal_width: Option<usize>,
    persist_every: u64,
    progress_bar: BackgroundProgressBar,
    rpm_markers: RenderQueue,
    pending_events: RenderQueue,

    line_cache: String,
    wait_marker_at: Option<usize>,
    render_phase: RenderPhase,
    line_preserve: bool,
    persist_due: bool,
    cursor_x: usize,
    cursor_y: u64,

    requests_estimated: Option<u64>,
    requests_successful: u64,
    request_num: u64,
    attempt: u32,
    status: Option<(bool, String)>,
    size_total: u64,
    progress_perc: Option<f64>,
    rpm: Option<f64>,
    minutes_left: Option<f64>,
}

impl SequenceRenderer<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> SequenceRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            terminal_width: None,
            persist_every: 10,
            progress_bar: BackgroundProgressBar::new(
                SgrSequence::new([34, 1]),
                SgrSequence::default(),
            ),
            rpm_markers: RenderQueue::new(),
            pending_events: RenderQueue::new(),
            line_cache: String::new(),
            wait_marker_at: None,
            render_phase: RenderPhase::Blank,
            line_preserve: false,
            persist_due: false,
            cursor_x: 0,
            cursor_y: 0,
            requests_estimated: None,
            requests_successful: 0,
            request_num: 0,
            attempt: 0,
            status: None,
            size_total: 0,
            progress_perc: None,
            rpm: None,
            minutes_left: None,
        }
    }

    /// Fixes the terminal width instead of querying it on every clear.
    pub fn with_terminal_width(mut self, width: usize) -> Self {
        self.terminal_width = Some(width);
        self
    }

    /// Persists the live line every `persist_every` requests (`0` = never).
    pub fn with_persist_every(mut self, persist_every: u64) -> Self {
        self.persist_every = persist_every;
        self
    }

    /// Applies the rendering part of `options`.
    pub fn with_options(self, options: &FlowOptions) -> Self {
        self.with_persist_every(options.persist_every)
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render_phase(&self) -> RenderPhase {
        self.render_phase
    }

    /// Visible column and estimated row of the virtual cursor.
    pub fn cursor(&self) -> (usize, u64) {
        (self.cursor_x, self.cursor_y)
    }

    /// Raw text (with SGR sequences) of the currently visible line.
    pub fn line_cache(&self) -> &str {
        &self.line_cache
    }

    pub fn size_total(&self) -> u64 {
        self.size_total
    }

    pub fn print_separator(&mut self) {
        let width = self.width().min(SEPARATOR_MAX_WIDTH);
        self.print(&"─".repeat(width));
        self.persist_line();
    }

    fn width(&self) -> usize {
        self.terminal_width.unwrap_or_else(terminal_width)
    }

    fn gray() -> SgrSequence {
        SgrSequence::new([GRAY])
    }

    fn render(&mut self) {
        let marker = self.rpm_markers.iterate(true);

        self.render_introducer();
        self.render_request_id();
        self.render_status();
        self.render_progress();
        self.render_eta();
        self.render_rpm(marker);
        self.render_size();
        self.flush_pending_events();
        self.render_phase = RenderPhase::Complete;

        // kept live until the next request starts so retries can still patch it
        self.persist_due = self.persist_every > 0
            && self.request_num > 0
            && self.request_num % self.persist_every == 0;
    }

    fn render_introducer(&mut self) {
        let glyph = if self.cursor_y % 2 == 0 { '>' } else { ' ' };
        self.print(&format!("{}{glyph}{} ", SgrSequence::new([97]), sgr::RESET));
    }

    fn render_request_id(&mut self) {
        let request = format!("#{}", self.request_num);
        let retried = self.attempt > 1;
        let (attempt_fmt, attempt_marker, attempt_reset) = if retried {
            (format!("{}{}", sgr::RED, sgr::BOLD), 'R', sgr::RESET)
        } else {
            (String::new(), ' ', "")
        };

        self.print(&format!(
            "{}{request:>3}{}{attempt_fmt}{attempt_marker:>2}{attempt_reset}",
            SgrSequence::new([1, 97]),
            sgr::RESET,
        ));
        // right-aligned in a 2-column cell
        self.wait_marker_at = Some(self.line_cache.len() + 1);
        self.print("  ");
    }

    fn render_status(&mut self) {
        let (text, fmt) = match &self.status {
            None => ("n/a".to_owned(), sgr::HI_YELLOW),
            Some((ok, code)) => (
                format!("{code:<3}"),
                if *ok { sgr::GREEN } else { sgr::RED },
            ),
        };
        let overflow = text.chars().count().saturating_sub(3);
        let pad = &INDENT[..INDENT.len().saturating_sub(overflow)];
        self.print(&format!("{pad}{fmt}{text}{}{INDENT}", sgr::RESET));
    }

    fn render_progress(&mut self) {
        let progress = match self.progress_perc.filter(|perc| *perc > 0.0) {
            Some(perc) => {
                let label = format!("{:<4}%", format_auto_float(perc, 4).trim_start());
                self.progress_bar.update(label, perc / 100.0);
                self.progress_bar.format()
            }
            None => format!("{}--- %{}", Self::gray(), sgr::RESET),
        };
        self.print(&format!("{progress}{INDENT}"));
    }

    fn render_eta(&mut self) {
        let (fmt, eta): (String, String) = match self.minutes_left {
            Some(minutes) => (String::new(), format_duration(minutes * 60.0)),
            None => (
                Self::gray().to_string(),
                format_duration(600.0)
                    .chars()
                    .map(|c| if c.is_whitespace() { c } else { '-' })
                    .collect(),
            ),
        };
        self.print(&format!("{fmt}ETA {eta:<6}{INDENT}{}", sgr::RESET));
    }

    fn render_rpm(&mut self, marker: Option<Renderable>) {
        let line = match self.rpm {
            Some(rpm) => {
                let value = format_auto_float(rpm.min(MAX_DISPLAYED_RPM), 4)
                    .trim_start()
                    .to_owned();
                let cell = match marker {
                    Some(marker) => format!("{:>5}", format!("*{value}")).replacen('*', marker.text(), 1),
                    None => format!("{value:>5}"),
                };
                format!("{cell}{} RPM{}{INDENT}", sgr::RESET, sgr::RESET)
            }
            None => {
                let gray = Self::gray();
                let placeholder: String = format_auto_float(10.0, 4)
                    .chars()
                    .map(|c| if c.is_ascii_digit() { '-' } else { c })
                    .collect();
                format!(
                    "{gray}{placeholder:>5}{} {gray}RPM{}{INDENT}",
                    sgr::RESET,
                    sgr::RESET
                )
            }
        };
        self.print(&line);
    }

    fn render_size(&mut self) {
        self.print(&format!("{:>8}{INDENT}", format_size(self.size_total)));
    }

    fn flush_pending_events(&mut self) {
        let events: Vec<String> = self
            .pending_events
            .drain()
            .map(|event| event.text().to_owned())
            .collect();
        for event in events {
            self.print(&event);
        }
    }

    fn print(&mut self, s: &str) {
        self.line_cache.push_str(s);
        self.write_raw(s);
        self.cursor_x += visible_width(s);
        self.render_phase = RenderPhase::Partial;
    }

    fn write_raw(&mut self, s: &str) {
        // terminal output is best-effort
        let _ = self.out.write_all(s.as_bytes());
        let _ = self.out.flush();
    }

    fn clear_line_state(&mut self) {
        self.line_cache.clear();
        self.wait_marker_at = None;
        self.cursor_x = 0;
        self.cursor_y += 1;
        self.render_phase = RenderPhase::Blank;
    }

    fn persist_line(&mut self) {
        self.write_raw("\n");
        self.line_preserve = false;
        self.persist_due = false;
        self.clear_line_state();
    }

    fn reset_line(&mut self) {
        if self.render_phase != RenderPhase::Blank {
            if self.line_preserve {
                self.write_raw("\n");
            } else {
                let blank = " ".repeat(self.width());
                self.write_raw(&format!("\r{blank}\r"));
            }
        }
        self.line_preserve = false;
        self.clear_line_state();
    }
}

impl<W: Write> RequestFlowHooks for SequenceRenderer<W> {
    fn reinit(&mut self, requests_estimated: Option<u64>) {
        if self.persist_due && self.render_phase != RenderPhase::Blank {
            self.persist_line();
        }
        self.persist_due = false;
        self.line_cache.clear();
        self.wait_marker_at = None;
        self.render_phase = RenderPhase::Blank;
        self.line_preserve = false;
        self.cursor_x = 0;
        self.cursor_y = 0;

        self.requests_estimated = requests_estimated;
        self.requests_successful = 0;
        self.request_num = 0;
        self.attempt = 0;
        self.status = None;
        self.size_total = 0;
        self.progress_perc = None;
        self.rpm = None;
        self.minutes_left = None;

        self.rpm_markers.clear();
        self.pending_events.clear();
        self.progress_bar.reset();
    }

    fn before_batch(&mut self, label: &str) {
        if self.render_phase != RenderPhase::Blank {
            self.persist_line();
        }
        self.print(&format!("Data provider: {}{label}{}", sgr::BLUE, sgr::RESET));
        self.persist_line();
        self.print_separator();
    }

    fn after_batch(&mut self) {
        if self.render_phase != RenderPhase::Blank {
            self.persist_line();
        }
    }

    fn before_request(&mut self, request_num: u64) {
        if self.persist_due && self.render_phase != RenderPhase::Blank {
            self.persist_line();
        }
        self.persist_due = false;
        self.request_num = request_num;
        self.status = None;
    }

    fn before_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    fn on_failure(&mut self, _attempt: u32, message: &str) {
        self.print_event(&format!("{}Error: {message}{}", sgr::RED, sgr::RESET), true);
    }

    fn update_statistics(&mut self, ok: bool, size: u64, rpm: Option<f64>) {
        if ok {
            self.size_total += size;
            self.requests_successful += 1;
        }
        if let Some(rpm) = rpm.filter(|rpm| *rpm > 0.0) {
            self.rpm = Some(rpm);
        }
        if let Some(estimated) = self.requests_estimated.filter(|estimated| *estimated > 0) {
            let done = self.requests_successful as f64 / estimated as f64;
            self.progress_perc = Some(100.0 * done.min(1.0));
            if let Some(rpm) = self.rpm {
                let remaining = estimated.saturating_sub(self.requests_successful);
                self.minutes_left = Some(remaining as f64 / rpm);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            size_total = self.size_total,
            rpm = ?self.rpm,
            progress = ?self.progress_perc,
            minutes_left = ?self.minutes_left,
            "statistics updated"
        );
    }

    fn on_completion(&mut self, ok: bool, status: &str) {
        self.status = Some((ok, status.to_owned()));
        self.reset_line();
        if !ok {
            let suffix = if status == "429" { ", retrying..." } else { "" };
            self.print(&format!(
                "Request #{} resulted in HTTP code {status}{suffix}",
                self.request_num
            ));
            self.persist_line();
        }
        self.render();
        if !ok && self.render_phase == RenderPhase::Complete {
            self.line_preserve = true;
        }
    }

    fn before_sleep(&mut self, seconds: f64) {
        self.print_event(&format!("Waiting for {seconds:.2}s{INDENT}"), false);
    }

    fn sleep_tick(&mut self, seconds_left: f64) {
        let Some(at) = self.wait_marker_at else {
            return;
        };
        if at >= self.line_cache.len() {
            return;
        }
        let glyph = if (seconds_left.trunc() as i64) % 2 == 0 {
            format!("{}W{}", SgrSequence::new([36, 1]), sgr::RESET)
        } else {
            " ".to_owned()
        };
        let line = format!(
            "\r{}{glyph}{}",
            &self.line_cache[..at],
            &self.line_cache[at + 1..]
        );
        self.write_raw(&line);
    }

    fn after_sleep(&mut self) {
        self.line_cache.clear();
        self.wait_marker_at = None;
    }

    fn on_delay_changed(&mut self, change: DelayChange, _delay_sec: f64) {
        let (fmt, marker) = match change {
            DelayChange::Unchanged => (sgr::CYAN, '&'),
            DelayChange::Increased => (sgr::YELLOW, '!'),
            DelayChange::Decreased => (sgr::GREEN, '^'),
        };
        self.rpm_markers.push_fragment(
            format!("{fmt}{}{marker}{}", sgr::BOLD, SgrSequence::new([22])),
            MARKER_TTL_SEC,
        );
    }

    fn print_event(&mut self, message: &str, persist: bool) {
        #[cfg(feature = "tracing")]
        tracing::debug!(event = %sgr::strip_sgr(message), persist, "request sequence event");

        if persist {
            self.reset_line();
            self.print(message);
            self.persist_line();
            self.render();
            return;
        }

        let event = format!("{}{message}{}{INDENT}", Self::gray(), sgr::RESET);
        if self.render_phase == RenderPhase::Complete {
            self.print(&event);
            self.render_phase = RenderPhase::Complete;
        } else {
            self.pending_events.push_text(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RenderPhase, SequenceRenderer};
    use crate::hooks::{DelayChange, RequestFlowHooks};
    use crate::sgr::{strip_sgr, visible_width};
    use crate::FlowOptions;

    const STATUS_LINE_WIDTH: usize = 62;

    fn renderer() -> SequenceRenderer<Vec<u8>> {
        SequenceRenderer::new(Vec::new()).with_terminal_width(20)
    }

    fn output(renderer: &SequenceRenderer<Vec<u8>>) -> String {
        String::from_utf8_lossy(renderer.get_ref()).into_owned()
    }

    /// Text of the line the terminal currently shows (after the last CR/LF).
    fn visible_line(renderer: &SequenceRenderer<Vec<u8>>) -> String {
        output(renderer)
            .rsplit(['\r', '\n'])
            .next()
            .unwrap_or_default()
            .to_owned()
    }

    fn complete(renderer: &mut SequenceRenderer<Vec<u8>>, request_num: u64, attempt: u32) {
        renderer.before_request(request_num);
        renderer.before_attempt(attempt);
        renderer.update_statistics(true, 1024, None);
        renderer.on_completion(true, "200");
    }

    #[test]
    fn status_line_has_fixed_visible_width_without_data() {
        let mut renderer = renderer();
        complete(&mut renderer, 1, 1);

        let line = visible_line(&renderer);
        assert_eq!(visible_width(&line), STATUS_LINE_WIDTH);
        let plain = strip_sgr(&line);
        assert!(plain.contains("--- %"), "{plain}");
        assert!(plain.contains("ETA -- ---"), "{plain}");
        assert!(plain.contains("--.- RPM"), "{plain}");
        assert_eq!(renderer.render_phase(), RenderPhase::Complete);
    }

    #[test]
    fn status_line_keeps_width_with_statistics_and_marker() {
        let mut renderer = renderer();
        renderer.reinit(Some(4));
        renderer.before_request(1);
        renderer.before_attempt(2);
        renderer.update_statistics(true, 1024, Some(30.0));
        renderer.on_delay_changed(DelayChange::Increased, 1.0);
        renderer.on_completion(true, "200");

        let line = visible_line(&renderer);
        assert_eq!(visible_width(&line), STATUS_LINE_WIDTH);
        let plain = strip_sgr(&line).into_owned();
        assert!(plain.contains("#1 R"), "{plain}");
        assert!(plain.contains("25.0%"), "{plain}");
        assert!(plain.contains("ETA 6 sec"), "{plain}");
        assert!(plain.contains("!30.0 RPM"), "{plain}");
        assert!(plain.contains("1.00 kb"), "{plain}");
    }

    #[test]
    fn sleep_tick_patches_wait_marker_in_place() {
        let mut renderer = renderer();
        complete(&mut renderer, 3, 1);

        renderer.sleep_tick(4.0);
        let waiting = strip_sgr(&visible_line(&renderer)).into_owned();
        assert_eq!(waiting.chars().nth(8), Some('W'), "{waiting}");
        assert_eq!(visible_width(&waiting), STATUS_LINE_WIDTH);

        renderer.sleep_tick(3.0);
        let blank = strip_sgr(&visible_line(&renderer)).into_owned();
        assert_eq!(blank.chars().nth(8), Some(' '), "{blank}");
        assert_eq!(renderer.render_phase(), RenderPhase::Complete);
    }

    #[test]
    fn transient_events_wait_for_a_complete_line() {
        let mut renderer = renderer();
        renderer.before_sleep(2.0);
        assert!(!output(&renderer).contains("Waiting"));

        complete(&mut renderer, 1, 1);
        assert!(strip_sgr(&visible_line(&renderer)).contains("Waiting for 2.00s"));

        renderer.before_sleep(1.5);
        assert!(strip_sgr(&visible_line(&renderer)).contains("Waiting for 1.50s"));
    }

    #[test]
    fn persisted_event_gets_its_own_line() {
        let mut renderer = renderer();
        complete(&mut renderer, 1, 1);
        renderer.print_event("Set post-request delay to 0.80s", true);

        assert!(output(&renderer).contains("\rSet post-request delay to 0.80s\n"));
        assert_eq!(renderer.render_phase(), RenderPhase::Complete);
    }

    #[test]
    fn failed_completion_is_kept_in_scrollback() {
        let mut renderer = renderer();
        renderer.before_request(1);
        renderer.before_attempt(1);
        renderer.update_statistics(false, 0, None);
        renderer.on_completion(false, "500");
        assert!(output(&renderer).contains("Request #1 resulted in HTTP code 500\n"));

        let failed_line = visible_line(&renderer);
        complete(&mut renderer, 2, 1);
        // the failed status line is terminated by a newline instead of being cleared
        assert!(output(&renderer).contains(&format!("{failed_line}\n")));
    }

    #[test]
    fn line_is_persisted_once_the_request_after_every_nth_starts() {
        let mut renderer = renderer().with_persist_every(2);
        complete(&mut renderer, 1, 1);
        assert!(!output(&renderer).ends_with('\n'));
        complete(&mut renderer, 2, 1);
        assert!(!output(&renderer).ends_with('\n'));
        assert_eq!(renderer.render_phase(), RenderPhase::Complete);

        renderer.before_request(3);
        assert!(output(&renderer).ends_with('\n'));
        assert_eq!(renderer.render_phase(), RenderPhase::Blank);
    }

    #[test]
    fn persist_interval_comes_from_options() {
        let options = FlowOptions {
            persist_every: 1,
            ..FlowOptions::default()
        };
        let mut renderer = renderer().with_options(&options);
        complete(&mut renderer, 1, 1);
        renderer.before_request(2);
        assert!(output(&renderer).ends_with('\n'));
    }

    #[test]
    fn backoff_on_nth_request_still_shows_countdown() {
        let mut renderer = renderer().with_persist_every(10);
        renderer.before_request(10);
        renderer.before_attempt(1);
        renderer.on_failure(1, "connection reset by peer");
        renderer.before_sleep(30.0);
        assert!(strip_sgr(&visible_line(&renderer)).contains("Waiting for 30.00s"));

        renderer.sleep_tick(30.0);
        let waiting = strip_sgr(&visible_line(&renderer)).into_owned();
        assert_eq!(waiting.chars().nth(8), Some('W'), "{waiting}");
        renderer.after_sleep();

        renderer.before_attempt(2);
        renderer.update_statistics(true, 10, None);
        renderer.on_completion(true, "200");
        let retried = strip_sgr(&visible_line(&renderer)).into_owned();
        assert!(retried.contains("#10 R"), "{retried}");
        assert!(!retried.contains("Waiting"), "{retried}");

        renderer.before_request(11);
        assert!(output(&renderer).ends_with('\n'));
    }

    #[test]
    fn huge_rpm_keeps_fixed_width_with_marker() {
        let mut renderer = renderer();
        renderer.before_request(1);
        renderer.before_attempt(1);
        renderer.update_statistics(true, 10, Some(12_345.0));
        renderer.on_delay_changed(DelayChange::Decreased, 0.1);
        renderer.on_completion(true, "200");

        let line = visible_line(&renderer);
        assert_eq!(visible_width(&line), STATUS_LINE_WIDTH);
        assert!(strip_sgr(&line).contains("^9999 RPM"), "{line}");
    }

    #[test]
    fn batch_header_prints_label_and_separator() {
        let mut renderer = renderer();
        renderer.before_batch("https://api.example.com/history");
        let out = strip_sgr(&output(&renderer)).into_owned();
        assert!(out.starts_with("Data provider: https://api.example.com/history\n"));
        assert!(out.ends_with(&format!("{}\n", "─".repeat(20))));
    }

    #[test]
    fn reinit_clears_statistics() {
        let mut renderer = renderer();
        renderer.reinit(Some(10));
        renderer.update_statistics(true, 4096, Some(12.0));
        assert_eq!(renderer.size_total(), 4096);

        renderer.reinit(None);
        assert_eq!(renderer.size_total(), 0);
        assert_eq!(renderer.cursor(), (0, 0));
        assert!(renderer.line_cache().is_empty());
    }
}
