// src/utils/log.rs

//! Formatted log blocks on top of the `log` facade.
//!
//! Records go through whatever logger the binary installed; these helpers
//! only shape multi-line output such as run headers and summaries.

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("{}", summary_lines(title, items).join("\n"));
}

fn summary_lines(title: &str, items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    std::iter::once(format!("[SUMMARY] {title}"))
        .chain(
            items
                .iter()
                .map(|(key, value)| format!("    {key:<width$} : {value}")),
        )
        .collect()
}
