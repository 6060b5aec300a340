//! Upload sources
//!
//! An [`UploadSource`] is a finite, restartable sequence of lines. Each call
//! to [`UploadSource::lines`] starts a fresh pass from the beginning.

use gcodelink_core::{Result, StreamError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How lines are cleaned up before they are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
    /// Remove `;` and `( )` comments
    pub strip_comments: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            strip_comments: true,
        }
    }
}

#[derive(Debug, Clone)]
enum Origin {
    File(PathBuf),
    Memory(Arc<Vec<String>>),
}

/// Lines to stream to the firmware
#[derive(Debug, Clone)]
pub struct UploadSource {
    origin: Origin,
    options: SourceOptions,
}

impl UploadSource {
    /// Stream a file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StreamError::Source {
                reason: format!("{} is not a readable file", path.display()),
            }
            .into());
        }
        Ok(Self {
            origin: Origin::File(path.to_path_buf()),
            options: SourceOptions::default(),
        })
    }

    /// Stream lines held in memory
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origin: Origin::Memory(Arc::new(lines.into_iter().map(Into::into).collect())),
            options: SourceOptions::default(),
        }
    }

    /// Replace the preprocessing options
    pub fn with_options(mut self, options: SourceOptions) -> Self {
        self.options = options;
        self
    }

    /// Human-readable origin, for logs
    pub fn name(&self) -> String {
        match &self.origin {
            Origin::File(path) => path.display().to_string(),
            Origin::Memory(lines) => format!("<{} lines in memory>", lines.len()),
        }
    }

    /// Start a pass over the source, yielding only sendable lines
    pub fn lines(&self) -> Result<Box<dyn Iterator<Item = Result<String>> + Send>> {
        let options = self.options;
        let raw: Box<dyn Iterator<Item = Result<String>> + Send> = match &self.origin {
            Origin::File(path) => {
                let file = File::open(path).map_err(|e| StreamError::Source {
                    reason: format!("{}: {}", path.display(), e),
                })?;
                let name = path.display().to_string();
                Box::new(BufReader::new(file).lines().map(move |line| {
                    line.map_err(|e| {
                        StreamError::Source {
                            reason: format!("{}: {}", name, e),
                        }
                        .into()
                    })
                }))
            }
            Origin::Memory(lines) => {
                let lines = Arc::clone(lines);
                Box::new((0..lines.len()).map(move |i| Ok(lines[i].clone())))
            }
        };

        Ok(Box::new(raw.filter_map(move |line| match line {
            Ok(line) => {
                let cleaned = clean_line(&line, options);
                (!cleaned.is_empty()).then_some(Ok(cleaned))
            }
            Err(e) => Some(Err(e)),
        })))
    }
}

/// Trim a line and optionally drop its comments
pub fn clean_line(line: &str, options: SourceOptions) -> String {
    if !options.strip_comments {
        return line.trim().to_string();
    }

    let mut out = String::with_capacity(line.len());
    let mut depth = 0usize;
    for c in line.chars() {
        match c {
            ';' if depth == 0 => break,
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn collect(source: &UploadSource) -> Vec<String> {
        source.lines().unwrap().map(|l| l.unwrap()).collect()
    }

    #[test]
    fn test_clean_line() {
        let opts = SourceOptions::default();
        assert_eq!(clean_line("G0 X1 ; rapid", opts), "G0 X1");
        assert_eq!(clean_line("(header) G1 X2 (feed)", opts), "G1 X2");
        assert_eq!(clean_line("   ", opts), "");
        assert_eq!(clean_line("; only a comment", opts), "");

        let keep = SourceOptions {
            strip_comments: false,
        };
        assert_eq!(clean_line("  G0 X1 ; rapid ", keep), "G0 X1 ; rapid");
    }

    #[test]
    fn test_memory_source_skips_blank_lines() {
        let source = UploadSource::from_lines(["G21", "", "  ", "(setup)", "G0 X1"]);
        assert_eq!(collect(&source), vec!["G21", "G0 X1"]);
        // Restartable
        assert_eq!(collect(&source), vec!["G21", "G0 X1"]);
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "G21\r\n\nG90 ; absolute\nG0 X10").unwrap();

        let source = UploadSource::from_file(file.path()).unwrap();
        assert_eq!(collect(&source), vec!["G21", "G90", "G0 X10"]);
    }

    #[test]
    fn test_missing_file() {
        assert!(UploadSource::from_file("/nonexistent/job.nc").is_err());
    }
}
