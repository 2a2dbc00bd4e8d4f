use std::collections::VecDeque;
use std::env;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, ShellError};

/// Bounded command history; the oldest line is evicted once full.
pub struct History {
    lines: VecDeque<String>,
    capacity: usize,
    file_path: Option<PathBuf>,
}

impl History {
    /// In-memory history that is never persisted.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
            file_path: None,
        }
    }

    /// Loads history from `path`. A missing file starts an empty history.
    pub fn load(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let mut history = Self::new(capacity);

        match File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line.map_err(|source| ShellError::History {
                        path: path.clone(),
                        source,
                    })?;
                    history.append(&line);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ShellError::History { path, source }),
        }

        history.file_path = Some(path);
        Ok(history)
    }

    pub fn default_path() -> PathBuf {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".msh_history")
    }

    pub fn append(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// Looks up a line by its 1-based index.
    pub fn get(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// One display line per entry: 1-based index right-justified in 5 columns, a tab, the text.
    pub fn render(&self) -> Vec<String> {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:5}\t{}", i + 1, line))
            .collect()
    }

    pub fn list(&self) {
        for line in self.render() {
            println!("{}", line);
        }
    }

    /// Rewrites the backing file with the retained lines.
    pub fn save(&self) -> Result<()> {
        match &self.file_path {
            Some(path) => self.write_to(path).map_err(|source| ShellError::History {
                path: path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = File::create(path)?;
        for line in &self.lines {
            writeln!(file, "{}", line)?;
        }
        file.flush()
    }
}
