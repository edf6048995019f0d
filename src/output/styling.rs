use std::fmt::Display;

use comfy_table::Color as TableColor;
use console::{style, StyledObject};

/// How healthy a value looks, used to pick terminal and table colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Good,
    Warning,
    Critical,
}

impl Tone {
    /// Higher is better: above 95% good, 80% and up warning.
    pub fn for_rate(rate: f64) -> Self {
        if rate > 95.0 {
            Self::Good
        } else if rate >= 80.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }

    /// Counts of faults: zero is good, anything else a warning.
    pub fn for_faults(count: usize) -> Self {
        if count == 0 {
            Self::Good
        } else {
            Self::Warning
        }
    }

    pub fn paint(self, text: impl Display) -> StyledObject<String> {
        match self {
            Self::Good => bright_green(text),
            Self::Warning => bright_yellow(text),
            Self::Critical => bright_red(text),
        }
    }

    pub fn table_color(self) -> TableColor {
        match self {
            Self::Good => TableColor::Green,
            Self::Warning => TableColor::Yellow,
            Self::Critical => TableColor::Red,
        }
    }
}

pub fn bright_yellow(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}
