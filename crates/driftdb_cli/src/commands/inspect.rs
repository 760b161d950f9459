//! Inspect command implementation.

use super::{CliError, CliResult};
use driftdb_core::{Config, Database};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Latest local commit version.
    pub last_version: u64,
    /// Latest server version integrated.
    pub server_version: u64,
    /// Local changesets not yet acknowledged by the server.
    pub unsynced_changesets: usize,
    /// Operations in those changesets.
    pub unsynced_operations: usize,
    /// Where a manual client reset would move the file.
    pub recovery_path: String,
    /// Per-class statistics.
    pub classes: Vec<ClassStats>,
}

/// Statistics for a single class.
#[derive(Debug, Serialize)]
pub struct ClassStats {
    /// Class name.
    pub name: String,
    /// Number of live objects.
    pub object_count: usize,
    /// Total payload size in bytes.
    pub data_size: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Opens the file read-mostly and collects statistics. Never creates it.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    if !path.exists() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }

    let db = Database::open_with_config(path, Config::new().create_if_missing(false))?;
    let unsynced = db.unsynced_changesets()?;

    let mut classes = Vec::new();
    for name in db.classes()? {
        let objects = db.list(&name)?;
        classes.push(ClassStats {
            object_count: objects.len(),
            data_size: objects.iter().map(|(_, payload)| payload.len()).sum(),
            name,
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        file_size: path.metadata().map(|m| m.len()).unwrap_or(0),
        last_version: db.last_version(),
        server_version: db.server_version(),
        unsynced_changesets: unsynced.len(),
        unsynced_operations: unsynced
            .iter()
            .map(|changeset| changeset.operations.len())
            .sum(),
        recovery_path: db
            .recovery_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        classes,
    };
    db.close()?;
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!("================================");
    println!();
    println!("File size:        {}", format_bytes(result.file_size));
    println!("Last version:     {}", result.last_version);
    println!("Server version:   {}", result.server_version);
    println!(
        "Unsynced:         {} changesets ({} operations)",
        result.unsynced_changesets, result.unsynced_operations
    );
    println!("Recovery path:    {}", result.recovery_path);
    println!();

    if result.classes.is_empty() {
        println!("No objects.");
        return;
    }

    println!("Classes:");
    println!("  {:<24} {:>10} {:>12}", "Name", "Objects", "Size");
    println!("  {:-<24} {:->10} {:->12}", "", "", "");
    for class in &result.classes {
        println!(
            "  {:<24} {:>10} {:>12}",
            class.name,
            class.object_count,
            format_bytes(class.data_size as u64)
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::ObjectId;
    use tempfile::tempdir;

    #[test]
    fn inspect_counts_classes_and_unsynced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.drift");
        let db = Database::open(&path).unwrap();
        db.transaction(|txn| {
            txn.put("Dog", ObjectId::new(), vec![0; 10])?;
            txn.put("Dog", ObjectId::new(), vec![0; 5])?;
            txn.put("Cat", ObjectId::new(), vec![0; 1])
        })
        .unwrap();
        db.close().unwrap();

        let result = inspect(&path).unwrap();
        assert_eq!(result.last_version, 1);
        assert_eq!(result.server_version, 0);
        assert_eq!(result.unsynced_changesets, 1);
        assert_eq!(result.unsynced_operations, 3);
        assert!(result.file_size > 0);

        let dog = result.classes.iter().find(|c| c.name == "Dog").unwrap();
        assert_eq!(dog.object_count, 2);
        assert_eq!(dog.data_size, 15);
    }

    #[test]
    fn inspect_missing_file() {
        let dir = tempdir().unwrap();
        let result = inspect(&dir.path().join("missing.drift"));
        assert!(matches!(result, Err(CliError::NotFound(_))));
    }

    #[test]
    fn json_output_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.drift");
        Database::open(&path).unwrap().close().unwrap();

        let result = inspect(&path).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["unsynced_changesets"], 0);
        assert!(json["classes"].as_array().unwrap().is_empty());
        assert!(json["recovery_path"].as_str().unwrap().contains("recovered"));
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
