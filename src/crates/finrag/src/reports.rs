//! Local filings and the download collaborator.
//!
//! Financial paths check that the filing a question is about exists locally.
//! A missing one raises the `confirm_download` interrupt; on "yes" the
//! [`ReportDownloader`] fetches it and the [`ReportCatalog`] records it.
//!
//! [`DirectoryReportCatalog`] names files `<company>_<year>_<type>.<ext>`,
//! lowercased with spaces turned into hyphens, e.g. `apple_2022_10-k.pdf`.

use async_trait::async_trait;
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{FinragError, Result};

/// Identifies one filing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ReportKey {
    pub company: String,
    pub year: i32,
    /// Filing type, e.g. `10-K`
    pub doc_type: String,
}

fn slug(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

impl ReportKey {
    pub fn new(company: impl Into<String>, year: i32, doc_type: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            year,
            doc_type: doc_type.into(),
        }
    }

    /// Canonical file stem
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", slug(&self.company), self.year, slug(&self.doc_type))
    }

    /// Inverse of [`file_stem`](Self::file_stem); the company may contain `_`
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let mut parts = stem.rsplitn(3, '_');
        let doc_type = parts.next()?;
        let year = parts.next()?.parse().ok()?;
        let company = parts.next()?;
        (!company.is_empty() && !doc_type.is_empty()).then(|| Self::new(company, year, doc_type))
    }

    fn same_filing(&self, other: &ReportKey) -> bool {
        self.file_stem() == other.file_stem()
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.company, self.year, self.doc_type)
    }
}

/// Which filings are available locally
#[async_trait]
pub trait ReportCatalog: Send + Sync {
    async fn contains(&self, key: &ReportKey) -> Result<bool>;

    /// Record a downloaded filing stored at `path`
    async fn register(&self, key: &ReportKey, path: &Path) -> Result<()>;

    async fn list(&self) -> Result<Vec<ReportKey>>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.list().await?.is_empty())
    }
}

/// Fetches a missing filing
#[async_trait]
pub trait ReportDownloader: Send + Sync {
    /// Download into `dir`, returning the stored file
    async fn download(&self, key: &ReportKey, dir: &Path) -> Result<PathBuf>;
}

/// Catalog over a data directory
#[derive(Debug, Clone)]
pub struct DirectoryReportCatalog {
    dir: PathBuf,
}

impl DirectoryReportCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ReportCatalog for DirectoryReportCatalog {
    async fn contains(&self, key: &ReportKey) -> Result<bool> {
        Ok(self.list().await?.iter().any(|k| k.same_filing(key)))
    }

    async fn register(&self, key: &ReportKey, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("pdf");
        let target = self.dir.join(format!("{}.{extension}", key.file_stem()));
        if path != target {
            fs::copy(path, &target).await?;
        }
        info!(report = %key, path = %target.display(), "report registered");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ReportKey>> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut keys = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ReportKey::from_file_stem);
            match parsed {
                Some(key) => {
                    keys.insert(key);
                }
                None => debug!(path = %path.display(), "skipping file without a report name"),
            }
        }
        Ok(keys.into_iter().collect())
    }
}

/// Catalog held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryReportCatalog {
    reports: Arc<RwLock<BTreeSet<ReportKey>>>,
}

impl InMemoryReportCatalog {
    pub fn new<I: IntoIterator<Item = ReportKey>>(reports: I) -> Self {
        Self {
            reports: Arc::new(RwLock::new(reports.into_iter().collect())),
        }
    }
}

#[async_trait]
impl ReportCatalog for InMemoryReportCatalog {
    async fn contains(&self, key: &ReportKey) -> Result<bool> {
        Ok(self.reports.read().iter().any(|k| k.same_filing(key)))
    }

    async fn register(&self, key: &ReportKey, _path: &Path) -> Result<()> {
        self.reports.write().insert(key.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ReportKey>> {
        Ok(self.reports.read().iter().cloned().collect())
    }
}

/// Downloader used when none is configured; every download fails
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredDownloader;

#[async_trait]
impl ReportDownloader for UnconfiguredDownloader {
    async fn download(&self, key: &ReportKey, _dir: &Path) -> Result<PathBuf> {
        Err(FinragError::Report(format!(
            "no report downloader configured, cannot fetch {key}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_stem_round_trip() {
        let key = ReportKey::new("Bank of America", 2023, "10-K");
        assert_eq!(key.file_stem(), "bank-of-america_2023_10-k");
        let parsed = ReportKey::from_file_stem(&key.file_stem()).unwrap();
        assert!(parsed.same_filing(&key));

        let underscored = ReportKey::from_file_stem("j_p_morgan_2021_10-q").unwrap();
        assert_eq!(underscored.company, "j_p_morgan");
        assert_eq!(underscored.year, 2021);

        assert!(ReportKey::from_file_stem("notes").is_none());
        assert!(ReportKey::from_file_stem("apple_twenty_10-k").is_none());
    }

    #[tokio::test]
    async fn test_directory_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = DirectoryReportCatalog::new(dir.path().join("data"));
        assert!(catalog.is_empty().await.unwrap());

        fs::create_dir_all(catalog.dir()).await.unwrap();
        fs::write(catalog.dir().join("apple_2022_10-k.pdf"), b"%PDF").await.unwrap();
        fs::write(catalog.dir().join("README"), b"notes").await.unwrap();

        assert!(!catalog.is_empty().await.unwrap());
        assert!(catalog.contains(&ReportKey::new("Apple", 2022, "10-K")).await.unwrap());
        assert!(!catalog.contains(&ReportKey::new("Tesla", 2023, "10-K")).await.unwrap());

        let download = dir.path().join("tsla.pdf");
        fs::write(&download, b"%PDF").await.unwrap();
        let tesla = ReportKey::new("Tesla", 2023, "10-K");
        catalog.register(&tesla, &download).await.unwrap();
        assert!(catalog.contains(&tesla).await.unwrap());
        assert_eq!(catalog.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unconfigured_downloader_fails() {
        let err = UnconfiguredDownloader
            .download(&ReportKey::new("Tesla", 2023, "10-K"), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Tesla 2023 10-K"));
    }
}
