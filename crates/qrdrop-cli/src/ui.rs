//! UI utilities for QrDrop CLI.

const BOX_WIDTH: usize = 46;
const BAR_WIDTH: usize = 24;

/// A framed summary of a reconstructed file.
pub struct FileBox<'a> {
    title: &'a str,
    rows: Vec<(&'a str, String)>,
}

impl<'a> FileBox<'a> {
    /// Create a new box with a centered title.
    #[must_use]
    pub const fn new(title: &'a str) -> Self {
        Self {
            title,
            rows: Vec::new(),
        }
    }

    /// Add a labelled row.
    #[must_use]
    pub fn row(mut self, label: &'a str, value: impl Into<String>) -> Self {
        self.rows.push((label, value.into()));
        self
    }

    /// Display the box to stdout.
    pub fn display(&self) {
        println!("  ┌{}┐", "─".repeat(BOX_WIDTH));
        println!("  │{}│", center_in_box(self.title, BOX_WIDTH));
        println!("  ├{}┤", "─".repeat(BOX_WIDTH));
        for (label, value) in &self.rows {
            let line = format!(" {:<10} {}", label, truncate(value, BOX_WIDTH - 12));
            println!("  │{}│", pad_right(&line, BOX_WIDTH));
        }
        println!("  └{}┘", "─".repeat(BOX_WIDTH));
    }
}

fn center_in_box(content: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(content_len);
    let left = padding / 2;
    let right = padding - left;
    format!("{}{}{}", " ".repeat(left), content, " ".repeat(right))
}

fn pad_right(content: &str, width: usize) -> String {
    let len = content.chars().count();
    format!("{}{}", content, " ".repeat(width.saturating_sub(len)))
}

/// Shorten `s` to `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

/// Render a fixed-width progress bar for `percentage` (0.0 - 100.0).
pub fn progress_bar(percentage: f64) -> String {
    let clamped = percentage.clamp(0.0, 100.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((clamped / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>5.1}%",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        clamped
    )
}

/// Format a byte count using 1024-based units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a seconds estimate as "M:SS".
pub fn format_eta(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
