use crate::sgr::{self, SgrSequence};

/// Progress indicator drawn as a text label whose leading part is
/// highlighted in proportion to the completion ratio.
///
/// The visible width is always `indicator_size + 2 * indent_size` as long as
/// the label fits into `indicator_size` columns.
#[derive(Clone, Debug)]
pub struct BackgroundProgressBar {
    highlight: SgrSequence,
    regular: SgrSequence,
    label: String,
    ratio: f64,
    indicator_size: usize,
    indent_size: usize,
}

impl BackgroundProgressBar {
    pub const DEFAULT_INDICATOR_SIZE: usize = 5;

    pub fn new(highlight: SgrSequence, regular: SgrSequence) -> Self {
        Self {
            highlight,
            regular,
            label: String::new(),
            ratio: 0.0,
            indicator_size: Self::DEFAULT_INDICATOR_SIZE,
            indent_size: 0,
        }
    }

    pub fn with_indicator_size(mut self, indicator_size: usize) -> Self {
        self.indicator_size = indicator_size;
        self
    }

    pub fn with_indent_size(mut self, indent_size: usize) -> Self {
        self.indent_size = indent_size;
        self
    }

    /// Replaces the label and clamps `ratio` into `[0, 1]`.
    pub fn update(&mut self, label: impl Into<String>, ratio: f64) {
        self.label = label.into();
        self.ratio = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(0.0, 1.0)
        };
    }

    pub fn reset(&mut self) {
        self.label.clear();
        self.ratio = 0.0;
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn format(&self) -> String {
        let split = ((self.ratio * self.indicator_size as f64).floor() as usize)
            .min(self.indicator_size);
        let split_at = self
            .label
            .char_indices()
            .nth(split)
            .map_or(self.label.len(), |(index, _)| index);
        let (left, right) = self.label.split_at(split_at);

        let left_width = split + self.indent_size;
        let right_width = self.indicator_size - split + self.indent_size;

        format!(
            "{}{left:>left_width$}{}{}{right:<right_width$}{}",
            self.highlight,
            sgr::RESET,
            self.regular,
            sgr::RESET,
        )
    }
}
