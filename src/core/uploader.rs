use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;

use super::errors::CoreError;
use super::google_drive::{document_mime, StorageDestination};
use super::models::{UploadDestination, UploadOutcome, UploadRecord, UploadSummary};
use super::observer::{RunEvent, RunObserver};

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub folder_prefix: String,
    pub parent_folder_id: Option<String>,
    pub pacing: Duration,
}

pub fn destination_name(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}_{}", date.format("%Y-%m-%d"))
}

pub async fn eligible_documents(staging_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !tokio::fs::try_exists(staging_dir).await.unwrap_or(false) {
        return Err(CoreError::MissingPrerequisite(format!(
            "staging folder {} does not exist",
            staging_dir.display()
        ))
        .into());
    }

    let mut entries = tokio::fs::read_dir(staging_dir)
        .await
        .with_context(|| format!("failed to list {}", staging_dir.display()))?;

    let mut documents = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let recognized = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(document_mime)
            .is_some();
        if recognized && entry.file_type().await?.is_file() {
            documents.push(path);
        }
    }

    documents.sort();
    Ok(documents)
}

pub struct UploadCoordinator<'a, S: StorageDestination + ?Sized> {
    storage: &'a S,
    config: UploadConfig,
    observer: &'a dyn RunObserver,
    destination: Option<UploadDestination>,
    records: Vec<UploadRecord>,
}

impl<'a, S: StorageDestination + ?Sized> UploadCoordinator<'a, S> {
    pub fn new(storage: &'a S, config: UploadConfig, observer: &'a dyn RunObserver) -> Self {
        Self {
            storage,
            config,
            observer,
            destination: None,
            records: Vec::new(),
        }
    }

    pub async fn create_destination(
        &mut self,
        name: &str,
        parent: Option<&str>,
    ) -> anyhow::Result<UploadDestination> {
        if let Some(existing) = &self.destination {
            return Ok(existing.clone());
        }

        let folder_id = self.storage.create_folder(name, parent).await?;
        let destination = UploadDestination {
            folder_id,
            name: name.to_string(),
            parent_id: parent.map(str::to_string),
        };
        self.observer.on_event(&RunEvent::DestinationCreated {
            name: destination.name.clone(),
            link: destination.link(),
        });

        self.destination = Some(destination.clone());
        Ok(destination)
    }

    pub async fn upload_all(
        &mut self,
        files: &[PathBuf],
        destination: &UploadDestination,
    ) -> UploadSummary {
        for (position, path) in files.iter().enumerate() {
            if position > 0 && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }

            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let outcome = match self.upload_one(path, &file_name, destination).await {
                Ok(file_id) => {
                    self.observer.on_event(&RunEvent::FileUploaded {
                        file_name: file_name.clone(),
                        file_id: file_id.clone(),
                    });
                    UploadOutcome::Uploaded { file_id }
                }
                Err(err) => {
                    let failure = CoreError::Upload {
                        file: file_name.clone(),
                        reason: format!("{err:#}"),
                    };
                    self.observer.on_event(&RunEvent::FileUploadFailed {
                        file_name: file_name.clone(),
                        reason: format!("{err:#}"),
                    });
                    UploadOutcome::Failed {
                        reason: failure.to_string(),
                    }
                }
            };

            self.records.push(UploadRecord {
                file_name,
                path: path.clone(),
                outcome,
            });
        }

        self.summarize()
    }

    async fn upload_one(
        &self,
        path: &Path,
        file_name: &str,
        destination: &UploadDestination,
    ) -> anyhow::Result<String> {
        let mime = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(document_mime)
            .ok_or_else(|| anyhow::anyhow!("unsupported document type"))?;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.storage
            .create_file(file_name, mime, bytes, &destination.folder_id)
            .await
    }

    pub async fn purge_local(&self, staging_dir: &Path) -> usize {
        match purge_files(staging_dir).await {
            Ok(removed) => {
                self.observer.on_event(&RunEvent::StagingPurged { removed });
                removed
            }
            Err(err) => {
                let failure = CoreError::LocalCleanup(format!("{err:#}"));
                self.observer.on_event(&RunEvent::CleanupFailed {
                    reason: failure.to_string(),
                });
                0
            }
        }
    }

    pub fn summarize(&self) -> UploadSummary {
        let uploaded = self
            .records
            .iter()
            .filter(|record| matches!(record.outcome, UploadOutcome::Uploaded { .. }))
            .count();

        UploadSummary {
            uploaded,
            total: self.records.len(),
            destination_name: self.destination.as_ref().map(|d| d.name.clone()),
            destination_link: self.destination.as_ref().map(UploadDestination::link),
            records: self.records.clone(),
        }
    }

    pub async fn run(
        &mut self,
        staging_dir: &Path,
        date: NaiveDate,
    ) -> anyhow::Result<UploadSummary> {
        let files = eligible_documents(staging_dir).await?;
        self.observer.on_event(&RunEvent::FilesDiscovered { count: files.len() });
        if files.is_empty() {
            self.observer.on_event(&RunEvent::NothingToUpload);
            return Ok(self.summarize());
        }

        let name = destination_name(&self.config.folder_prefix, date);
        let parent = self.config.parent_folder_id.clone();
        let destination = self.create_destination(&name, parent.as_deref()).await?;

        self.upload_all(&files, &destination).await;
        self.purge_local(staging_dir).await;

        Ok(self.summarize())
    }
}

async fn purge_files(staging_dir: &Path) -> anyhow::Result<usize> {
    let mut entries = tokio::fs::read_dir(staging_dir)
        .await
        .with_context(|| format!("failed to list {}", staging_dir.display()))?;

    let mut removed = 0;
    let mut first_error: Option<anyhow::Error> = None;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(err) => {
                let err = anyhow::Error::new(err)
                    .context(format!("failed to delete {}", entry.path().display()));
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(removed),
    }
}
