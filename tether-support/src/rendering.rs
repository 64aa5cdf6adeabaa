//! Text rendering utilities for diagnostics.
//!
//! The container produces structured error records; these helpers turn
//! dependency chains, "while locating" trails and numbered message lists
//! into text.

use std::fmt::Write;

/// Renders a dependency chain as a single line.
///
/// # Examples
/// ```
/// use tether_support::rendering::render_chain;
///
/// let chain = vec!["Alpha", "Beta", "Alpha"];
/// assert_eq!(render_chain(&chain), "Alpha → Beta → Alpha");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// One step of a provisioning trail.
#[derive(Debug, Clone)]
pub struct TrailEntry {
    /// Display form of the key being located.
    pub key: String,
    /// Where the binding for the key was declared, if known.
    pub source: Option<String>,
}

/// Renders a provisioning trail, innermost request first.
///
/// ```text
///   while locating Database
///     bound at src/app.rs:12:5
///   while locating UserService
/// ```
///
/// `entries` is ordered from the top-level request to the failure point,
/// the way a provision path is recorded.
pub fn render_trail(entries: &[TrailEntry]) -> String {
    let mut result = String::new();

    for entry in entries.iter().rev() {
        let _ = writeln!(result, "  while locating {}", entry.key);
        if let Some(ref source) = entry.source {
            let _ = writeln!(result, "    bound at {source}");
        }
    }

    result
}

/// Renders a numbered list of messages under a heading.
///
/// ```
/// use tether_support::rendering::render_report;
///
/// let text = render_report("Unable to create injector", &["first".to_string()]);
/// assert!(text.starts_with("Unable to create injector"));
/// assert!(text.contains("1) first"));
/// assert!(text.ends_with("1 error"));
/// ```
pub fn render_report(heading: &str, messages: &[String]) -> String {
    let mut result = format!("{heading}, see the following errors:\n\n");

    for (index, message) in messages.iter().enumerate() {
        let mut lines = message.lines();
        if let Some(first) = lines.next() {
            let _ = writeln!(result, "{}) {first}", index + 1);
        }
        for line in lines {
            let _ = writeln!(result, "   {line}");
        }
        result.push('\n');
    }

    match messages.len() {
        1 => result.push_str("1 error"),
        n => {
            let _ = write!(result, "{n} errors");
        }
    }
    result
}

/// Shortens a fully qualified type name for display.
///
/// ```
/// use tether_support::rendering::shorten_type_name;
///
/// let short = shorten_type_name("my_app::services::user::UserService");
/// assert_eq!(short, "UserService");
///
/// let short = shorten_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>");
/// assert_eq!(short, "Arc<dyn Logger>");
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut current_segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                current_segment.clear();
            }
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                result.push_str(&current_segment);
                result.push(ch);
                current_segment.clear();
            }
            _ => current_segment.push(ch),
        }
    }

    result.push_str(&current_segment);
    result
}

/// Picks names from `available` that look like `requested`.
///
/// Used for the "did you mean" hints attached to missing-implementation
/// errors. Exact substring matches rank first, then short-name matches,
/// then names sharing a common prefix of at least three characters.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let requested_lower = requested.to_lowercase();
    let requested_short = shorten_type_name(requested).to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter_map(|&name| {
            let name_lower = name.to_lowercase();
            let name_short = shorten_type_name(name).to_lowercase();

            if name_lower == requested_lower {
                return None;
            }

            if name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower) {
                return Some((name, 100));
            }

            if name_short.contains(&requested_short) || requested_short.contains(&name_short) {
                return Some((name, 80));
            }

            let common = name_short
                .chars()
                .zip(requested_short.chars())
                .take_while(|(a, b)| a == b)
                .count();

            (common >= 3).then_some((name, common * 10))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.dedup_by(|a, b| a.0 == b.0);
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}
