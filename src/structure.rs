//! Input layout classification.
//!
//! A book directory directly below the input root is `Flat`; one nested inside
//! an author folder is `Structured`. The decision looks at path depth only.

use std::path::Path;

use crate::path_utils::get_file_name_lossy;
use crate::types::{BookDirectory, LayoutKind};

/// Classifies `path` relative to `input_root`.
pub fn detect(path: &Path, input_root: &Path) -> BookDirectory {
    let book = get_file_name_lossy(path);

    match path.parent() {
        Some(parent) if parent != input_root => BookDirectory {
            path: path.to_path_buf(),
            kind: LayoutKind::Structured,
            inferred_author: Some(get_file_name_lossy(parent)),
            inferred_book: book,
        },
        _ => BookDirectory {
            path: path.to_path_buf(),
            kind: LayoutKind::Flat,
            inferred_author: None,
            inferred_book: book,
        },
    }
}
