//! Just-enough descriptor reading for directory scans.
//!
//! The engine only ever needs `OnlyShowIn` and `Categories` from an
//! application descriptor, so this reader does a plain line scan instead of
//! pulling in a full key-file parser. Locale-aware lookups stay with the
//! external descriptor reader.

use std::path::Path;
use tracing::debug;

/// The two values a scan extracts from an application descriptor.
#[derive(Debug, Default)]
pub(crate) struct DesktopValues {
    pub only_show_in: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
}

/// Read the scan-relevant values from a descriptor file.
///
/// An unreadable file yields `None`; the caller skips the entry.
pub(crate) fn read_desktop_values(path: &Path) -> Option<DesktopValues> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unreadable descriptor");
            return None;
        }
    };

    Some(DesktopValues {
        only_show_in: find_value(&text, "OnlyShowIn").map(|v| split_list(&v)),
        categories: find_value(&text, "Categories").map(|v| split_list(&v)),
    })
}

/// Find `key = value` in descriptor text, first match wins.
///
/// Localized variants (`Key[locale]=`) never match: the `[` stops the `=`
/// check, which is what we want for the unlocalized keys read here.
fn find_value(text: &str, key: &str) -> Option<String> {
    for line in text.lines() {
        let trimmed = line.trim_start_matches([' ', '\t']);
        let Some(rest) = trimmed.strip_prefix(key) else {
            continue;
        };
        let rest = rest.trim_start_matches([' ', '\t']);
        let Some(value) = rest.strip_prefix('=') else {
            continue;
        };
        let value = value
            .trim_start_matches([' ', '\t'])
            .trim_end_matches('\r');
        return unescape(value);
    }
    None
}

/// Undo descriptor escapes. A malformed escape invalidates the whole value.
fn unescape(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\0' {
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            _ => return None,
        }
    }
    Some(out)
}

/// Split a semicolon-separated descriptor list, dropping the trailing empty
/// segment left by the conventional terminating `;`.
fn split_list(value: &str) -> Vec<String> {
    let mut items: Vec<String> = value.split(';').map(str::to_string).collect();
    if items.last().is_some_and(String::is_empty) {
        items.pop();
    }
    items
}
