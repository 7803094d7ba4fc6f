use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CdbuildError;

/// Source archives whose deletion failed, kept for a later sweep.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct OrphanLedger {
    pub entries: Vec<OrphanEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrphanEntry {
    pub project: String,
    pub bucket: String,
    pub object: String,
    pub recorded_at: DateTime<Utc>,
}

impl OrphanEntry {
    pub fn new(
        project: impl Into<String>,
        bucket: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            bucket: bucket.into(),
            object: object.into(),
            recorded_at: Utc::now(),
        }
    }

    fn is_same_object(&self, bucket: &str, object: &str) -> bool {
        self.bucket == bucket && self.object == object
    }
}

impl OrphanLedger {
    pub fn for_project<'a>(
        &'a self,
        project: &'a str,
    ) -> impl Iterator<Item = &'a OrphanEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.project == project)
    }
}

/// Where the ledger lives on disk.
#[derive(Debug, Clone, Default)]
pub struct LedgerFile {
    path: Option<PathBuf>,
}

impl LedgerFile {
    const APP_NAME: &'static str = "cdbuild";
    const CONFIG_NAME: &'static str = "orphans";

    /// `orphans.toml` in the platform config directory.
    pub fn default_location() -> Self {
        Self { path: None }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<OrphanLedger, CdbuildError> {
        let ledger = match &self.path {
            Some(path) => confy::load_path(path)?,
            None => confy::load(Self::APP_NAME, Self::CONFIG_NAME)?,
        };
        Ok(ledger)
    }

    fn store(&self, ledger: &OrphanLedger) -> Result<(), CdbuildError> {
        match &self.path {
            Some(path) => confy::store_path(path, ledger)?,
            None => confy::store(Self::APP_NAME, Self::CONFIG_NAME, ledger)?,
        }
        Ok(())
    }

    /// Add `entry`, replacing an older record of the same object.
    pub fn record(&self, entry: OrphanEntry) -> Result<(), CdbuildError> {
        let mut ledger = self.load()?;
        ledger
            .entries
            .retain(|existing| !existing.is_same_object(&entry.bucket, &entry.object));
        ledger.entries.push(entry);
        self.store(&ledger)
    }

    pub fn forget(&self, bucket: &str, object: &str) -> Result<(), CdbuildError> {
        let mut ledger = self.load()?;
        let before = ledger.entries.len();
        ledger
            .entries
            .retain(|entry| !entry.is_same_object(bucket, object));
        if ledger.entries.len() != before {
            self.store(&ledger)?;
        }
        Ok(())
    }
}
