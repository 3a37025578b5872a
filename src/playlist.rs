//! The ordered set of media files to stream, fixed at startup, looped
//! forever.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use walkdir::WalkDir;

#[derive(Debug)]
pub struct Playlist {
    items: Vec<PathBuf>,
    cursor: usize,
}

impl Playlist {
    /// A single explicit media file.
    pub fn single(path: &Path) -> Result<Self> {
        ensure!(path.is_file(), "media file not found: {}", path.display());
        Ok(Self {
            items: vec![path.to_path_buf()],
            cursor: 0,
        })
    }

    /// Every file under `dir`, recursively, sorted lexicographically by
    /// full path.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut items: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();
        items.sort();
        ensure!(!items.is_empty(), "no media files under {}", dir.display());
        Ok(Self { items, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Index of the item `next` will hand out.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Current item, advancing the cursor modulo the playlist length.
    pub fn next(&mut self) -> PathBuf {
        let item = self.items[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.items.len();
        item
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::Playlist;

    #[test]
    fn cursor_wraps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let mut playlist = Playlist::from_dir(dir.path()).unwrap();
        assert_eq!(playlist.len(), 3);

        let names: Vec<String> = (0..4)
            .map(|_| playlist.next().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.mp4", "b.mp4", "c.mp4", "a.mp4"]);
    }

    #[test]
    fn enumeration_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/inner.mkv"), b"x").unwrap();
        fs::write(dir.path().join("outer.mp4"), b"x").unwrap();

        let mut playlist = Playlist::from_dir(dir.path()).unwrap();
        assert_eq!(playlist.len(), 2);
        // Full-path ordering puts "outer.mp4" before "sub/inner.mkv".
        assert!(playlist.next().ends_with("outer.mp4"));
        assert!(playlist.next().ends_with("sub/inner.mkv"));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Playlist::from_dir(dir.path()).is_err());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(Playlist::from_dir(&missing).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Playlist::single(&dir.path().join("gone.mp4")).is_err());
    }
}
