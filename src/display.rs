//! Colored CLI display utilities for watch output.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::watcher::{EventKind, WatchEvent};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// One line of `--json` output.
#[derive(Debug, Serialize)]
pub struct EventLine<'a> {
    pub timestamp: String,
    pub watched: &'a Path,
    #[serde(flatten)]
    pub event: &'a WatchEvent,
}

impl<'a> EventLine<'a> {
    #[must_use]
    pub fn new(watched: &'a Path, event: &'a WatchEvent) -> Self {
        Self {
            timestamp: timestamp(),
            watched,
            event,
        }
    }
}

fn label(kind: EventKind) -> String {
    let tag = format!("[{}]", kind.as_str().to_uppercase());
    match kind {
        EventKind::Change => tag.green().bold().to_string(),
        EventKind::Rename => tag.yellow().bold().to_string(),
        EventKind::Delete => tag.red().bold().to_string(),
    }
}

/// Print that `path` is now being watched.
pub fn print_watching(path: &Path) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[WATCH]".blue().bold(),
        path.display()
    );
    let _ = io::stdout().flush();
}

/// Print a normalized event received on the watcher for `watched`.
pub fn print_event(watched: &Path, event: &WatchEvent, json: bool) {
    if json {
        match serde_json::to_string(&EventLine::new(watched, event)) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        }
    } else {
        let detail = event
            .path()
            .map_or(String::new(), |p| format!(" -> {}", p.display()));
        println!(
            "{} {} {}{}",
            timestamp().dimmed(),
            label(event.kind),
            watched.display(),
            detail.cyan()
        );
    }
    let _ = io::stdout().flush();
}

/// Print that the watcher for `path` has closed.
pub fn print_closed(path: &Path) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[CLOSED]".magenta().bold(),
        path.display().dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print an error for `path`.
pub fn print_error(path: &Path, message: &str) {
    eprintln!(
        "{} {} {} - {}",
        timestamp().dimmed(),
        "[ERROR]".red().bold(),
        path.display(),
        message.red()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_event_line_json_shape() {
        let event = WatchEvent::new(EventKind::Rename, Some(PathBuf::from("/tmp/b.txt")));
        let line = EventLine::new(Path::new("/tmp/a.txt"), &event);
        let value = serde_json::to_value(&line).unwrap();

        assert_eq!(value["watched"], "/tmp/a.txt");
        assert_eq!(value["kind"], "rename");
        assert_eq!(value["path"], "/tmp/b.txt");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_event_line_null_path() {
        let event = WatchEvent::new(EventKind::Delete, None);
        let value = serde_json::to_value(EventLine::new(Path::new("/tmp/a.txt"), &event)).unwrap();
        assert_eq!(value["kind"], "delete");
        assert!(value["path"].is_null());
    }

    #[test]
    fn test_label_names_kind() {
        assert!(label(EventKind::Change).contains("[CHANGE]"));
        assert!(label(EventKind::Delete).contains("[DELETE]"));
    }
}
