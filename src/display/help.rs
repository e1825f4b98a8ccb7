//! Custom help formatting for consistent CLI display.

use crate::display::theme::Theme;
use console::style;

/// Format help text with consistent styling
pub fn format_help_section(title: &str, content: &str, indent: bool) -> String {
    let mut output = String::new();

    if Theme::should_disable_colors() {
        output.push_str(&format!("{title}\n"));
    } else {
        output.push_str(&format!("{}\n", style(title).cyan().bold()));
    }

    for line in content.lines() {
        if line.trim().is_empty() {
            output.push('\n');
        } else if indent && !line.starts_with("    ") {
            output.push_str(&format!("    {line}\n"));
        } else {
            output.push_str(&format!("{line}\n"));
        }
    }

    output
}

/// Help epilogue shown after the generated command list.
pub fn create_help_text() -> String {
    let mut help = String::new();

    let quick_start = r#"$ vidsearch init                         # Create .vidsearch/settings.toml
$ vidsearch import videos.jsonl          # Load embeddings (JSON lines)
$ vidsearch search --vector-file q.json  # Top-10 most similar videos"#;
    help.push_str(&format_help_section("QUICK START", quick_start, true));
    help.push('\n');

    let examples = r#"# Search with a metadata filter and a 50 ms deadline
$ vidsearch search --vector-file q.json -k 5 --filter channel_title=NASA --deadline-ms 50

# Search by text with the built-in hashing embedder (demo only)
$ vidsearch search --text "rocket launch"

# Inspect and maintain the index
$ vidsearch stats --json
$ vidsearch rebuild
$ vidsearch verify"#;
    help.push_str(&format_help_section("EXAMPLES", examples, true));
    help.push('\n');

    let environment = r#"RUST_LOG        log filter (default: vidsearch=info)
VS_INDEX__NPROBE, VS_QUERY__MAX_K, ...  override settings.toml"#;
    help.push_str(&format_help_section("ENVIRONMENT", environment, true));

    help
}
