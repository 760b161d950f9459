//! Reset command implementation.

use super::{CliError, CliResult};
use driftdb_core::recovery_path_for;
use std::path::{Path, PathBuf};

/// Runs the reset command, printing the recovery path on success.
pub fn run(original: &Path, recovery: Option<&Path>) -> CliResult<()> {
    let moved_to = reset(original, recovery)?;
    println!("Moved {} to {}", original.display(), moved_to.display());
    Ok(())
}

/// Moves `original` aside so the next open starts from scratch.
pub fn reset(original: &Path, recovery: Option<&Path>) -> CliResult<PathBuf> {
    if !original.exists() {
        return Err(CliError::NotFound(original.to_path_buf()));
    }

    let recovery = recovery.map_or_else(|| recovery_path_for(original), Path::to_path_buf);
    tracing::debug!(
        original = %original.display(),
        recovery = %recovery.display(),
        "executing offline client reset"
    );
    if driftdb_sync::move_to_recovery(original, &recovery) {
        Ok(recovery)
    } else {
        Err(CliError::ResetRefused(original.to_path_buf()))
    }
}
