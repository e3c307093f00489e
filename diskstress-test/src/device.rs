//! Scratch devices backed by temporary files.

use tempfile::NamedTempFile;

/// Creates a sparse temporary file of exactly `size` bytes.
///
/// The file is deleted when the returned handle is dropped.
pub fn sized_tempfile(size: u64) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    file.as_file().set_len(size).unwrap();
    file
}
