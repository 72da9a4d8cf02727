//! Checkbox glyph mapping
//!
//! Single source of truth for the glyph ↔ status mapping used by both the
//! parser and the renderer:
//!
//! `[ ]` to_do/unknown · `[-]` in_progress/skip · `[x]` completed/pass ·
//! `[!]` blocked/fail
//!
//! The parser additionally accepts common hand-typed variants and maps them
//! onto the canonical set before any further processing.

use crate::task::models::{EvrStatus, ItemStatus};

/// Canonical glyph characters.
pub const GLYPH_TODO: char = ' ';
pub const GLYPH_IN_PROGRESS: char = '-';
pub const GLYPH_COMPLETED: char = 'x';
pub const GLYPH_BLOCKED: char = '!';

/// Map any accepted glyph variant to its canonical character.
///
/// Returns `None` for characters that are not checkbox glyphs at all.
pub fn normalize_glyph(c: char) -> Option<char> {
    match c {
        ' ' | '\u{3000}' => Some(GLYPH_TODO),
        '-' | '~' | '/' | '\\' | '|' => Some(GLYPH_IN_PROGRESS),
        'x' | 'X' | '✓' | '✔' | '√' => Some(GLYPH_COMPLETED),
        '!' | '✗' | '✘' | '×' => Some(GLYPH_BLOCKED),
        _ => None,
    }
}

/// Canonical glyph for a plan/step status.
pub fn item_status_glyph(status: ItemStatus) -> char {
    match status {
        ItemStatus::ToDo => GLYPH_TODO,
        ItemStatus::InProgress => GLYPH_IN_PROGRESS,
        ItemStatus::Completed => GLYPH_COMPLETED,
        ItemStatus::Blocked => GLYPH_BLOCKED,
    }
}

/// Plan/step status for a canonical glyph.
pub fn item_status_from_glyph(c: char) -> Option<ItemStatus> {
    match normalize_glyph(c)? {
        GLYPH_TODO => Some(ItemStatus::ToDo),
        GLYPH_IN_PROGRESS => Some(ItemStatus::InProgress),
        GLYPH_COMPLETED => Some(ItemStatus::Completed),
        GLYPH_BLOCKED => Some(ItemStatus::Blocked),
        _ => None,
    }
}

/// Canonical glyph for an EVR status.
pub fn evr_status_glyph(status: EvrStatus) -> char {
    match status {
        EvrStatus::Unknown => GLYPH_TODO,
        EvrStatus::Skip => GLYPH_IN_PROGRESS,
        EvrStatus::Pass => GLYPH_COMPLETED,
        EvrStatus::Fail => GLYPH_BLOCKED,
    }
}

/// EVR status for a canonical glyph.
pub fn evr_status_from_glyph(c: char) -> Option<EvrStatus> {
    match normalize_glyph(c)? {
        GLYPH_TODO => Some(EvrStatus::Unknown),
        GLYPH_IN_PROGRESS => Some(EvrStatus::Skip),
        GLYPH_COMPLETED => Some(EvrStatus::Pass),
        GLYPH_BLOCKED => Some(EvrStatus::Fail),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_variants_normalize_identically() {
        for c in ['-', '~', '/', '\\', '|'] {
            assert_eq!(normalize_glyph(c), Some(GLYPH_IN_PROGRESS));
        }
        for c in ['x', 'X', '✓', '✔', '√'] {
            assert_eq!(normalize_glyph(c), Some(GLYPH_COMPLETED));
        }
        for c in ['!', '✗', '✘', '×'] {
            assert_eq!(normalize_glyph(c), Some(GLYPH_BLOCKED));
        }
        assert_eq!(normalize_glyph(' '), Some(GLYPH_TODO));
        assert_eq!(normalize_glyph('\u{3000}'), Some(GLYPH_TODO));
        assert_eq!(normalize_glyph('q'), None);
    }

    #[test]
    fn test_item_status_round_trip() {
        for status in [
            ItemStatus::ToDo,
            ItemStatus::InProgress,
            ItemStatus::Completed,
            ItemStatus::Blocked,
        ] {
            assert_eq!(item_status_from_glyph(item_status_glyph(status)), Some(status));
        }
    }

    #[test]
    fn test_evr_status_round_trip() {
        for status in [
            EvrStatus::Unknown,
            EvrStatus::Skip,
            EvrStatus::Pass,
            EvrStatus::Fail,
        ] {
            assert_eq!(evr_status_from_glyph(evr_status_glyph(status)), Some(status));
        }
    }
}
