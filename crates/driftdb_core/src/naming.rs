//! File naming for recovery copies.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Directory, next to the database file, that receives recovery copies.
pub const RECOVERY_DIR: &str = "recovered";

/// Returns a fresh recovery path for the database file at `original`.
///
/// `<dir>/app.drift` maps to `<dir>/recovered/app-<uuid>.drift`. Nothing is
/// created on disk; the path is only reserved by name.
#[must_use]
pub fn recovery_path_for(original: &Path) -> PathBuf {
    let parent = original.parent().unwrap_or_else(|| Path::new("."));
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    let suffix = Uuid::new_v4().simple();

    let file_name = match original.extension() {
        Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{suffix}"),
    };
    parent.join(RECOVERY_DIR).join(file_name)
}
