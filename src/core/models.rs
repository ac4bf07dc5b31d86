use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::portal::ControlDescriptor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RecencyFilter {
    OneMonth,
    ThreeMonths,
    SixMonths,
    TwelveMonths,
}

impl RecencyFilter {
    pub fn label(&self) -> &'static str {
        match self {
            RecencyFilter::OneMonth => "1 mois",
            RecencyFilter::ThreeMonths => "3 mois",
            RecencyFilter::SixMonths => "6 mois",
            RecencyFilter::TwelveMonths => "12 mois",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub job_title: String,
    pub region: String,
    pub recency: RecencyFilter,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            job_title: "Aide soignant".to_string(),
            region: "Île-de-France".to_string(),
            recency: RecencyFilter::TwelveMonths,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultPage {
    pub number: u32,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum DownloadOutcome {
    Downloaded,
    Failed {
        diagnostic: String,
        snapshot: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvArtifact {
    pub display_name: String,
    pub file_name: String,
    pub page: u32,
    pub index: usize,
    pub path: PathBuf,
    pub outcome: DownloadOutcome,
}

impl CvArtifact {
    pub fn is_downloaded(&self) -> bool {
        matches!(self.outcome, DownloadOutcome::Downloaded)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DoneReason {
    NoItems,
    NoNextPage,
    PageLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestReport {
    pub pages_processed: u32,
    pub done_reason: DoneReason,
    pub staging_dir: PathBuf,
    pub artifacts: Vec<CvArtifact>,
}

impl HarvestReport {
    pub fn downloaded(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_downloaded()).count()
    }

    pub fn failed(&self) -> usize {
        self.artifacts.len() - self.downloaded()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadDestination {
    pub folder_id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

impl UploadDestination {
    pub fn link(&self) -> String {
        format!("https://drive.google.com/drive/folders/{}", self.folder_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum UploadOutcome {
    Uploaded { file_id: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub file_name: String,
    pub path: PathBuf,
    pub outcome: UploadOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub uploaded: usize,
    pub total: usize,
    pub destination_name: Option<String>,
    pub destination_link: Option<String>,
    #[serde(default)]
    pub records: Vec<UploadRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub pages_processed: u32,
    pub harvested: usize,
    pub harvest_failures: usize,
    pub upload: UploadSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub signed_in: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub refreshable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortalLayout {
    pub login_email: ControlDescriptor,
    pub login_password: ControlDescriptor,
    pub login_submit: ControlDescriptor,
    pub landmark: ControlDescriptor,
    pub candidate_database: ControlDescriptor,
    pub consult_database: ControlDescriptor,
    pub job_title_input: ControlDescriptor,
    pub region_input: ControlDescriptor,
    pub region_suggestion: ControlDescriptor,
    pub recency_select: ControlDescriptor,
    pub search_submit: ControlDescriptor,
    pub view_document: ControlDescriptor,
    pub document_title: ControlDescriptor,
    pub download: ControlDescriptor,
    pub next_page: ControlDescriptor,
}

impl Default for PortalLayout {
    fn default() -> Self {
        Self {
            login_email: ControlDescriptor::css("#publisher_email"),
            login_password: ControlDescriptor::css("#publisher_password"),
            login_submit: ControlDescriptor::css("input[name=\"commit\"]"),
            landmark: ControlDescriptor::css("a.link_card_nav_recruiter"),
            candidate_database: ControlDescriptor::css("li#profiles > a"),
            consult_database: ControlDescriptor::css("a.btn_style[href*=\"/profiles\"]"),
            job_title_input: ControlDescriptor::css("#token-input-"),
            region_input: ControlDescriptor::css(
                "input[data-autocomplete-url*=\"/locations/autocomplete\"]",
            ),
            region_suggestion: ControlDescriptor::css(".ui-autocomplete li:first-child"),
            recency_select: ControlDescriptor::css("#last_update"),
            search_submit: ControlDescriptor::css("input.submit_button[value=\"Rechercher\"]"),
            view_document: ControlDescriptor::with_text("a", "Voir le CV"),
            document_title: ControlDescriptor::css("#profile_title"),
            download: ControlDescriptor::css("a.download[href*=\".pdf\"]"),
            next_page: ControlDescriptor::with_text("a.next_page", "Suivante"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    pub portal_url: String,
    pub portal_email: String,
    pub portal_password: String,
    pub search: SearchQuery,
    pub max_pages: u32,
    pub staging_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub callback_port: u16,
    pub consent_timeout_seconds: u64,
    pub open_browser_for_consent: bool,
    pub drive_parent_folder_id: Option<String>,
    pub destination_prefix: String,
    pub upload_pacing_ms: u64,
    pub step_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub download_timeout_ms: u64,
    pub typing_delay_ms: u64,
    pub webdriver_url: String,
    pub headless: bool,
    pub layout: PortalLayout,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            portal_url: "https://clients.agencestaff.fr/".to_string(),
            portal_email: String::new(),
            portal_password: String::new(),
            search: SearchQuery::default(),
            max_pages: 9,
            staging_dir: PathBuf::from("./cvs"),
            credentials_path: PathBuf::from("./credentials.json"),
            token_path: PathBuf::from("./token.json"),
            callback_port: 3000,
            consent_timeout_seconds: 120,
            open_browser_for_consent: true,
            drive_parent_folder_id: None,
            destination_prefix: "CVs_AideSoignantes".to_string(),
            upload_pacing_ms: 500,
            step_timeout_ms: 10_000,
            poll_interval_ms: 100,
            download_timeout_ms: 30_000,
            typing_delay_ms: 100,
            webdriver_url: "http://localhost:4444".to_string(),
            headless: false,
            layout: PortalLayout::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn portal_credentials(&self) -> PortalCredentials {
        PortalCredentials {
            email: self.portal_email.clone(),
            password: self.portal_password.clone(),
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn upload_pacing(&self) -> Duration {
        Duration::from_millis(self.upload_pacing_ms)
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_seconds)
    }
}
