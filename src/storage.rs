use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::DataPaths;
use crate::dataset::Dataset;
use crate::errors::{PipelineError, ResultExt};

/// Writes timestamped JSON snapshots under the data directories.
///
/// Files are named `<name>_<YYYYmmdd_HHMMSS>.json`. A snapshot never
/// overwrites an earlier one: a numeric suffix is appended when two land in
/// the same second.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    paths: DataPaths,
}

impl SnapshotStore {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// Raw enrichment output, before any cleaning.
    pub fn save_raw_json<T: Serialize + ?Sized>(
        &self,
        records: &T,
        name: &str,
    ) -> Result<PathBuf, PipelineError> {
        self.write_json(&self.paths.raw_dir, name, records)
    }

    pub fn save_processed_json(
        &self,
        dataset: &Dataset,
        name: &str,
    ) -> Result<PathBuf, PipelineError> {
        self.write_json(&self.paths.processed_dir, name, dataset)
    }

    pub fn save_report<T: Serialize + ?Sized>(
        &self,
        report: &T,
        name: &str,
    ) -> Result<PathBuf, PipelineError> {
        self.write_json(&self.paths.reports_dir, name, report)
    }

    /// Reads a snapshot back.
    pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let value = serde_json::from_reader(BufReader::new(file))?;
        Ok(value)
    }

    fn write_json<T: Serialize + ?Sized>(
        &self,
        dir: &Path,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;

        let stem = format!("{}_{}", name, Utc::now().format("%Y%m%d_%H%M%S"));
        let (path, file) = create_snapshot_file(dir, &stem)
            .with_context(|| format!("creating snapshot {} in {}", stem, dir.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer
            .flush()
            .with_context(|| format!("writing {}", path.display()))?;

        tracing::info!("Snapshot saved: {}", path.display());
        Ok(path)
    }
}

/// Creates `<stem>.json`, or `<stem>_<n>.json` for the first free `n`.
///
/// The file is opened with `create_new`, so an existing snapshot is never truncated.
fn create_snapshot_file(dir: &Path, stem: &str) -> io::Result<(PathBuf, File)> {
    let mut suffix = 0;
    loop {
        let path = if suffix == 0 {
            dir.join(format!("{}.json", stem))
        } else {
            dir.join(format!("{}_{}.json", stem, suffix))
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e),
        }
    }
}
