//! Bounded, ordered soundfont list.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Maximum number of soundfont entries a configuration may hold.
pub const MAX_SOUNDFONTS: usize = 16;

/// One configured soundfont file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoundfontEntry {
    /// Path to the SF2 file.
    pub path: PathBuf,
    /// Disabled entries are kept for reporting but never loaded.
    pub enabled: bool,
    /// Bank offset applied to presets of this soundfont.
    pub bank_offset: i32,
}

impl SoundfontEntry {
    /// Creates an enabled entry with no bank offset.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            bank_offset: 0,
        }
    }

    /// Returns true if the entry is enabled and its file can be opened for reading.
    pub fn is_usable(&self) -> bool {
        self.enabled && is_readable(&self.path)
    }
}

/// Error returned when pushing onto a full [`SoundfontList`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("soundfont list is full ({MAX_SOUNDFONTS} entries)")]
pub struct SoundfontListFull;

/// Ordered soundfont entries, capped at [`MAX_SOUNDFONTS`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SoundfontList {
    entries: Vec<SoundfontEntry>,
}

impl SoundfontList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_SOUNDFONTS),
        }
    }

    /// Appends an entry; fails once the list holds [`MAX_SOUNDFONTS`] entries.
    pub fn push(&mut self, entry: SoundfontEntry) -> Result<(), SoundfontListFull> {
        if self.is_full() {
            return Err(SoundfontListFull);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_SOUNDFONTS
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SoundfontEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SoundfontEntry> {
        self.entries.iter_mut()
    }

    /// Returns the most recently added entry.
    pub fn last_mut(&mut self) -> Option<&mut SoundfontEntry> {
        self.entries.last_mut()
    }

    /// Number of entries currently flagged enabled.
    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled).count()
    }

    /// The first enabled entry whose file is readable.
    pub fn primary(&self) -> Option<&SoundfontEntry> {
        self.entries.iter().find(|e| e.is_usable())
    }

    /// Enabled entries in load order.
    pub fn enabled(&self) -> impl Iterator<Item = &SoundfontEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }
}

impl<'a> IntoIterator for &'a SoundfontList {
    type Item = &'a SoundfontEntry;
    type IntoIter = std::slice::Iter<'a, SoundfontEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Returns true if `path` names a regular file this process can open for reading.
pub fn is_readable(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    File::open(path)
        .and_then(|f| f.metadata())
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_respects_capacity() {
        let mut list = SoundfontList::new();
        for i in 0..MAX_SOUNDFONTS {
            list.push(SoundfontEntry::new(format!("/sf/{}.sf2", i))).unwrap();
        }
        assert!(list.is_full());
        assert_eq!(
            list.push(SoundfontEntry::new("/sf/extra.sf2")),
            Err(SoundfontListFull)
        );
        assert_eq!(list.len(), MAX_SOUNDFONTS);
    }

    #[test]
    fn primary_skips_disabled_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.sf2");
        std::fs::write(&real, b"RIFF").unwrap();

        let mut list = SoundfontList::new();
        let mut disabled = SoundfontEntry::new(&real);
        disabled.enabled = false;
        list.push(disabled).unwrap();
        list.push(SoundfontEntry::new(dir.path().join("missing.sf2"))).unwrap();
        list.push(SoundfontEntry::new(&real)).unwrap();

        let primary = list.primary().unwrap();
        assert!(primary.enabled);
        assert_eq!(primary.path, real);
        assert_eq!(list.enabled_count(), 2);
    }

    #[test]
    fn directories_are_not_readable_soundfonts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_readable(dir.path()));
        assert!(!is_readable(Path::new("")));
    }
}
