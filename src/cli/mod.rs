//! CLI command definitions and argument parsing.
//!
//! Uses clap derive macros for ergonomic argument definitions.

pub mod args;

use std::io::Read;
use std::path::Path;

/// About text with ANSI styling for clap help output.
pub const ABOUT_STYLED: &str =
    "\x1b[1mrevcache\x1b[0m \x1b[2m· Content-addressed cache for AI code review results.\x1b[0m";

/// Read content from a file, or from stdin when the path is `-`.
pub fn read_input(path: &Path) -> std::io::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().lock().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("change.diff");
        std::fs::write(&path, "+fn main() {}\n").unwrap();
        assert_eq!(read_input(&path).unwrap(), b"+fn main() {}\n");
    }

    #[test]
    fn read_input_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_input(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn about_is_non_empty() {
        assert!(ABOUT_STYLED.contains("revcache"));
    }
}
