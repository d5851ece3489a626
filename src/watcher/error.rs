//! Watcher error types.

use std::path::PathBuf;

/// Errors that can occur while opening or managing watches.
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    /// The native source refused to watch a path.
    #[error("Unable to watch {path}: {source}")]
    Platform {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The hub was created outside of a tokio runtime.
    #[error("No tokio runtime available for the watch control loop")]
    NoRuntime,
}

impl WatchError {
    /// Build a [`WatchError::Platform`] for `path`.
    pub fn platform(path: impl Into<PathBuf>, source: notify::Error) -> Self {
        Self::Platform {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_display() {
        let err = WatchError::platform("/tmp/missing.txt", notify::Error::path_not_found());
        assert!(err
            .to_string()
            .starts_with("Unable to watch /tmp/missing.txt"));
    }

    #[test]
    fn test_no_runtime_display() {
        let err = WatchError::NoRuntime;
        assert_eq!(
            err.to_string(),
            "No tokio runtime available for the watch control loop"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "cwd gone");
        let watch_err: WatchError = io_err.into();
        assert!(matches!(watch_err, WatchError::Io(_)));
        assert!(watch_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_from_notify_error() {
        let notify_err = notify::Error::generic("test error");
        let watch_err: WatchError = notify_err.into();
        assert!(matches!(watch_err, WatchError::Notify(_)));
        assert!(watch_err.to_string().contains("File watcher error"));
    }
}
