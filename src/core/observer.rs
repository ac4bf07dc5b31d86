use std::path::PathBuf;

use tracing::{info, warn};

use super::models::{DoneReason, SearchQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    LoggedIn,
    SearchSubmitted { query: SearchQuery },
    PageStarted { page: u32, items: usize },
    ItemStarted { page: u32, index: usize, total: usize },
    ItemDownloaded { page: u32, index: usize, file_name: String },
    ItemFailed { page: u32, index: usize, reason: String },
    PaginationFinished { pages: u32, reason: DoneReason },
    TokenReused,
    TokenRefreshed,
    ConsentRequired { url: String },
    CallbackListening { port: u16 },
    TokenPersisted { path: PathBuf },
    DestinationCreated { name: String, link: String },
    FilesDiscovered { count: usize },
    NothingToUpload,
    FileUploaded { file_name: String, file_id: String },
    FileUploadFailed { file_name: String, reason: String },
    StagingPurged { removed: usize },
    CleanupFailed { reason: String },
}

pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::LoggedIn => info!("logged in to the portal"),
            RunEvent::SearchSubmitted { query } => info!(
                job_title = %query.job_title,
                region = %query.region,
                recency = query.recency.label(),
                "search submitted"
            ),
            RunEvent::PageStarted { page, items } => info!(page, items, "result page ready"),
            RunEvent::ItemStarted { page, index, total } => {
                info!(page, index, total, "harvesting CV")
            }
            RunEvent::ItemDownloaded {
                page,
                index,
                file_name,
            } => info!(page, index, file = %file_name, "CV downloaded"),
            RunEvent::ItemFailed {
                page,
                index,
                reason,
            } => warn!(page, index, %reason, "CV harvest failed"),
            RunEvent::PaginationFinished { pages, reason } => match reason {
                DoneReason::NoItems => warn!(pages, "no CVs on the last page, stopping"),
                DoneReason::NoNextPage => info!(pages, "no next page, harvest complete"),
                DoneReason::PageLimit => info!(pages, "page limit reached, harvest complete"),
            },
            RunEvent::TokenReused => info!("reusing persisted Drive token"),
            RunEvent::TokenRefreshed => info!("refreshed persisted Drive token"),
            RunEvent::ConsentRequired { url } => {
                info!("open this link to authorize Google Drive access:\n{url}")
            }
            RunEvent::CallbackListening { port } => {
                info!(port, "waiting for OAuth callback on localhost")
            }
            RunEvent::TokenPersisted { path } => {
                info!(path = %path.display(), "Drive token saved")
            }
            RunEvent::DestinationCreated { name, link } => {
                info!(folder = %name, %link, "Drive folder created")
            }
            RunEvent::FilesDiscovered { count } => info!(count, "documents staged for upload"),
            RunEvent::NothingToUpload => warn!("no documents to upload"),
            RunEvent::FileUploaded { file_name, file_id } => {
                info!(file = %file_name, id = %file_id, "uploaded")
            }
            RunEvent::FileUploadFailed { file_name, reason } => {
                warn!(file = %file_name, %reason, "upload failed")
            }
            RunEvent::StagingPurged { removed } => info!(removed, "staging folder emptied"),
            RunEvent::CleanupFailed { reason } => {
                warn!(%reason, "could not empty staging folder")
            }
        }
    }
}
