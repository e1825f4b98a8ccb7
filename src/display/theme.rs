//! Terminal styling for command output.

use console::Style;
use owo_colors::OwoColorize;
use std::sync::LazyLock;

use crate::query::SearchResponse;
use crate::service::VerifyReport;

/// Global theme instance for consistent styling across the application.
pub static THEME: LazyLock<Theme> = LazyLock::new(Theme::default);

/// How closely a hit matches its query, for coloring scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Strong,
    Moderate,
    Weak,
}

impl ScoreBand {
    #[must_use]
    pub fn of(score: f32) -> Self {
        if score >= 0.8 {
            ScoreBand::Strong
        } else if score >= 0.5 {
            ScoreBand::Moderate
        } else {
            ScoreBand::Weak
        }
    }
}

#[derive(Debug, Clone)]
pub struct Theme {
    pub success: Style,
    pub error: Style,
    pub warning: Style,
    /// Query statistics and other secondary lines
    pub dim: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            success: Style::new().green().bright(),
            error: Style::new().red().bright(),
            warning: Style::new().yellow().bright(),
            dim: Style::new().dim(),
        }
    }
}

impl Theme {
    pub fn success_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("✓ {text}")
        } else {
            format!("{} {}", "✓".green(), self.success.apply_to(text))
        }
    }

    pub fn error_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("✗ {text}")
        } else {
            format!("{} {}", "✗".red(), self.error.apply_to(text))
        }
    }

    pub fn warning_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("⚠ {text}")
        } else {
            format!("{} {}", "⚠".yellow(), self.warning.apply_to(text))
        }
    }

    /// Check if color output should be disabled.
    pub fn should_disable_colors() -> bool {
        use is_terminal::IsTerminal;
        std::env::var("NO_COLOR").is_ok() || !std::io::stdout().is_terminal()
    }

    pub fn apply<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if Self::should_disable_colors() {
            text.to_string()
        } else {
            style.apply_to(text).to_string()
        }
    }

    /// Dimmed line printed under a result table.
    pub fn search_summary(&self, response: &SearchResponse) -> String {
        self.apply(
            &self.dim,
            format!(
                "{} hits in {:.2} ms ({} segment, {} delta candidates, {} lists, generation {})",
                response.hits.len(),
                response.elapsed_ms,
                response.segment_candidates,
                response.delta_candidates,
                response.lists_probed,
                response.generation
            ),
        )
    }

    /// Headline for a verify run that found disagreements.
    pub fn verify_failure(&self, report: &VerifyReport) -> String {
        let problems = report.missing_from_index.len()
            + report.stale_in_index.len()
            + report.orphaned_in_index.len();
        self.error_with_icon(&format!(
            "Index generation {} disagrees with the store on {problems} videos",
            report.generation
        ))
    }
}
