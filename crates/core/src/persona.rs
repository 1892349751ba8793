//! Character preamble assembly.
//!
//! The persona biasing the model lives in a directory of plain-text files.
//! All `*.txt` files directly under the directory are concatenated, each
//! followed by a newline, in lexicographic file-name order so the result is
//! stable across platforms.

use std::{fs, io, path::Path};
use tracing::{debug, info};

/// Loads the character preamble from `dir`.
///
/// An absent directory yields an empty preamble; chat requests then carry no
/// persona at all. Unreadable files are an error.
pub fn load_preamble(dir: &Path) -> io::Result<String> {
    if !dir.is_dir() {
        debug!(path = %dir.display(), "character directory absent; using an empty preamble");
        return Ok(String::new());
    }

    let mut files: Vec<_> = fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("txt")
        })
        .collect();
    files.sort();

    let mut preamble = String::new();
    for path in &files {
        preamble.push_str(&fs::read_to_string(path)?);
        preamble.push('\n');
    }

    info!(
        files = files.len(),
        bytes = preamble.len(),
        "assembled character preamble"
    );
    Ok(preamble)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_txt_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_quirks.txt"), "Hates rainy days.").unwrap();
        fs::write(dir.path().join("a_persona.txt"), "You are a cheerful streamer.").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let preamble = load_preamble(dir.path()).unwrap();
        assert_eq!(
            preamble,
            "You are a cheerful streamer.\nHates rainy days.\n"
        );
    }

    #[test]
    fn absent_directory_yields_empty_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does_not_exist");

        let preamble = load_preamble(&missing).unwrap();
        assert!(preamble.is_empty());
    }

    #[test]
    fn empty_directory_yields_empty_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let preamble = load_preamble(dir.path()).unwrap();
        assert!(preamble.is_empty());
    }
}
