use crate::prelude::*;
use crate::snapshot::Snapshot;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Appends each published snapshot to a file as one JSON line.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    snapshots_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            snapshots_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let timestamp = snapshot
            .updated_at
            .unwrap_or_else(chrono::Utc::now)
            .timestamp();

        let line = serde_json::json!({
            "utc_timestamp": timestamp,
            "sequence": snapshot.sequence,
            "unit_count": snapshot.units.len(),
            "aggregated": snapshot.aggregated,
            "units": snapshot.units,
        });

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("datalog_writer.rs:Failed to lock datalog file"))?;

        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            error!("Failed to write to datalog file {}: {}", self.path, e);
            return Err(e.into());
        }

        if let Ok(mut written) = self.snapshots_written.lock() {
            *written += 1;
            trace!("{} snapshots stored in {}", *written, self.path);
        }

        Ok(())
    }

    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written.lock().map(|w| *w).unwrap_or(0)
    }
}
