use std::path::PathBuf;
use thiserror::Error;

/// Structured errors surfaced by the engine.
///
/// Only two failure classes ever reach the caller: a syntactically broken
/// menu file, and a lookup whose earlier failure is being re-raised from the
/// tree cache. Everything else (missing merge targets, unreadable
/// directories, menus without a name) degrades to an empty or partial result
/// and is only logged.
#[derive(Debug, Clone, Error)]
pub enum MenuError {
    /// The menu-file loader hit malformed syntax.
    #[error("failed to parse {file}:{line}: {message}")]
    Parse {
        /// File that failed to parse.
        file: PathBuf,
        /// 1-based line where parsing stopped.
        line: usize,
        /// Loader-specific description of the problem.
        message: String,
    },

    /// The requested menu file was not found on the search path.
    #[error("menu file {name:?} not found in any configuration directory")]
    NotFound {
        /// The name the lookup was asked for (absolute or relative).
        name: String,
    },

    /// A write through the override layer failed.
    #[error("override write failed at {path}: {message}")]
    Override {
        /// Path the write targeted.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A previously failed lookup, re-raised verbatim until invalidated.
    #[error("cached failure for {path}: {message}")]
    CachedFailure {
        /// Canonical path (or requested name) the failure is keyed by.
        path: PathBuf,
        /// The original error, rendered.
        message: String,
    },
}

impl MenuError {
    /// Wraps any error as the cached form re-raised by the tree cache.
    #[must_use]
    pub fn cached(path: PathBuf, source: &Self) -> Self {
        match source {
            // Already a cached failure: keep the original message.
            Self::CachedFailure { message, .. } => Self::CachedFailure {
                path,
                message: message.clone(),
            },
            other => Self::CachedFailure {
                path,
                message: other.to_string(),
            },
        }
    }
}
