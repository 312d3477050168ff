use std::io;
use std::path::{Path, PathBuf};

use crate::sanitize::split_extension;

/// An existing file this much shorter than the declared length still counts
/// as complete.
pub const SIZE_TOLERANCE_BYTES: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Download,
    Skip,
    /// A file left behind under an older title; move it into place instead of
    /// fetching it again.
    RenameFrom(PathBuf),
}

/// Decides what to do with `target` given the length the server declared.
///
/// This trusts the declared length only loosely: an unknown (or zero) length
/// means an existing file is kept as is, and a file that changed without
/// changing size is never noticed.
///
/// Files named in `keep` belong to other resources and are never renamed.
pub fn decide(
    target: &Path,
    expected_size: Option<u64>,
    keep: &[String],
) -> io::Result<Verdict> {
    let expected_size = expected_size.filter(|size| *size > 0);

    match std::fs::metadata(target) {
        Ok(meta) => {
            let Some(expected) = expected_size else {
                return Ok(Verdict::Skip);
            };
            if expected.saturating_sub(meta.len()) > SIZE_TOLERANCE_BYTES {
                Ok(Verdict::Download)
            } else {
                Ok(Verdict::Skip)
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let Some(expected) = expected_size else {
                return Ok(Verdict::Download);
            };
            Ok(match find_renamed(target, expected, keep)? {
                Some(existing) => Verdict::RenameFrom(existing),
                None => Verdict::Download,
            })
        }
        Err(err) => Err(err),
    }
}

/// Looks next to `target` for a file with the same extension, the same exact
/// size and a stem that is equal under [`normalize_for_match`], skipping the
/// names in `keep`.
pub fn find_renamed(target: &Path, size: u64, keep: &[String]) -> io::Result<Option<PathBuf>> {
    let Some(dir) = target.parent() else {
        return Ok(None);
    };
    let Some(target_name) = target.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    if !dir.is_dir() {
        return Ok(None);
    }

    let (target_stem, target_ext) = split_extension(target_name);
    let wanted = normalize_for_match(target_stem);

    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name == target_name
            || keep.iter().any(|kept| kept == name)
            || !entry.file_type()?.is_file()
        {
            continue;
        }
        let (stem, ext) = split_extension(name);
        if ext != target_ext || normalize_for_match(stem) != wanted {
            continue;
        }
        if entry.metadata()?.len() == size {
            return Ok(Some(entry.path()));
        }
    }

    Ok(None)
}

/// Comparison key for rename detection: parenthesised or bracketed qualifiers,
/// digits, whitespace and separator punctuation are removed and the rest is
/// lowercased. `"Lecture_One (old-title)"` and `"Lecture One"` share a key.
pub fn normalize_for_match(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    let mut depth = 0_usize;
    for c in stem.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            _ if c.is_whitespace() || c.is_ascii_digit() => {}
            '-' | '_' | '"' | ',' | '.' => {}
            _ => out.extend(c.to_lowercase()),
        }
    }
    out
}
