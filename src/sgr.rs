//! SGR (Select Graphic Rendition) escape sequences: `ESC [ <params> m`.

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use unicode_width::UnicodeWidthStr;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const BLUE: &str = "\x1b[34m";
pub const CYAN: &str = "\x1b[36m";
pub const HI_YELLOW: &str = "\x1b[93m";

/// A single SGR sequence built from integer parameters.
///
/// An empty parameter list renders as `ESC [ m`, which terminals treat as reset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SgrSequence {
    params: Vec<u8>,
}

impl SgrSequence {
    pub fn new(params: impl Into<Vec<u8>>) -> Self {
        Self {
            params: params.into(),
        }
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }
}

impl fmt::Display for SgrSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\x1b[")?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(";")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str("m")
    }
}

fn sgr_regex() -> &'static Regex {
    static SGR: OnceLock<Regex> = OnceLock::new();
    SGR.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("SGR pattern is valid"))
}

/// Removes every SGR sequence, keeping the text between them.
pub fn strip_sgr(s: &str) -> Cow<'_, str> {
    sgr_regex().replace_all(s, "")
}

/// Terminal column count of `s` once SGR sequences are removed.
pub fn visible_width(s: &str) -> usize {
    strip_sgr(s).width()
}
