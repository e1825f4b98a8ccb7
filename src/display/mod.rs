//! Rich terminal display utilities for enhanced CLI output.
//!
//! Provides styled tables, progress bars, and formatted output
//! for the vidsearch command-line tool.

pub mod help;
pub mod progress;
pub mod tables;
pub mod theme;

pub use help::{create_help_text, format_help_section};
pub use progress::{create_progress_bar, create_spinner, with_spinner};
pub use tables::{TableBuilder, create_results_table, create_stats_table, create_verify_table};
pub use theme::{ScoreBand, THEME, Theme};
