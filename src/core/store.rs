//! Persisted device number
//!
//! The last successfully claimed device number is kept as a single text line and read
//! back on the next start. It only biases automatic numbering, it never forces a number.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::{Error, Result, MAX_AUTO_NUMBER};

/// Storage for the last claimed device number
pub trait NumberStore: Send + Sync {
    /// Returns the stored number if one is present and usable
    fn load(&self) -> Option<u8>;

    /// Stores a freshly claimed number
    fn save(&self, number: u8) -> Result<()>;
}

fn parse_line(text: &str) -> Option<u8> {
    match text.trim().parse::<u8>() {
        Ok(n) if (1..=MAX_AUTO_NUMBER).contains(&n) => Some(n),
        _ => None,
    }
}

/// Keeps the number in a text file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NumberStore for FileStore {
    fn load(&self) -> Option<u8> {
        let text = fs::read_to_string(&self.path).ok()?;
        let number = parse_line(&text);
        debug!(path = %self.path.display(), ?number, "loaded device number");
        number
    }

    fn save(&self, number: u8) -> Result<()> {
        fs::write(&self.path, format!("{}\n", number))
            .map_err(|e| Error::store(format!("failed to write {}: {}", self.path.display(), e)))
    }
}

/// Keeps the number in memory, for tests and embedders without a filesystem
#[derive(Debug, Default)]
pub struct MemoryStore {
    line: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line(line: impl Into<String>) -> Self {
        MemoryStore { line: Mutex::new(Some(line.into())) }
    }

    /// The stored text line, without its newline
    pub fn line(&self) -> Option<String> {
        self.line.lock().ok().and_then(|line| line.clone())
    }
}

impl NumberStore for MemoryStore {
    fn load(&self) -> Option<u8> {
        self.line().as_deref().and_then(parse_line)
    }

    fn save(&self, number: u8) -> Result<()> {
        let mut line = self.line.lock().map_err(|_| Error::store("memory store poisoned"))?;
        *line = Some(number.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.load(), None);
        store.save(3).unwrap();
        assert_eq!(store.line().as_deref(), Some("3"));
        assert_eq!(store.load(), Some(3));
    }

    #[test]
    fn test_out_of_range_numbers_are_ignored() {
        assert_eq!(MemoryStore::with_line("0").load(), None);
        assert_eq!(MemoryStore::with_line("5").load(), None);
        assert_eq!(MemoryStore::with_line("junk").load(), None);
        assert_eq!(MemoryStore::with_line(" 4\n").load(), Some(4));
    }

    #[test]
    fn test_file_store() {
        let path = std::env::temp_dir().join(format!("prolink-vdj-store-{}", std::process::id()));
        let store = FileStore::new(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(store.load(), None);

        store.save(2).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n");
        assert_eq!(store.load(), Some(2));

        fs::remove_file(&path).unwrap();
    }
}
