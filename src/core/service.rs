use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use tracing::{info, warn};

use super::auth::{load_client_secrets, AccessTokenSource, CredentialConfig, CredentialStore};
use super::browser::WebDriverPortal;
use super::errors::CoreError;
use super::google_drive::{GoogleDriveClient, StorageDestination};
use super::harvester::{HarvesterConfig, ItemHarvester};
use super::models::{
    AuthStatus, DoneReason, HarvestReport, RunSummary, RuntimeSettings, UploadSummary,
};
use super::navigator::{NavigatorConfig, SessionNavigator};
use super::observer::{RunEvent, RunObserver};
use super::portal::Portal;
use super::uploader::{eligible_documents, UploadConfig, UploadCoordinator};

pub struct Orchestrator {
    settings: RuntimeSettings,
    client: reqwest::Client,
    observer: Arc<dyn RunObserver>,
}

impl Orchestrator {
    pub fn new(settings: RuntimeSettings, observer: Arc<dyn RunObserver>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("CvHarvester/1.0")
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self::with_client(settings, client, observer))
    }

    pub fn with_client(
        settings: RuntimeSettings,
        client: reqwest::Client,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            settings,
            client,
            observer,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn check_prerequisites(&self) -> anyhow::Result<()> {
        let credentials = self.settings.portal_credentials();
        if credentials.email.trim().is_empty() || credentials.password.is_empty() {
            return Err(CoreError::MissingPrerequisite(
                "portal email and password must be configured (settings or PORTAL_EMAIL/PORTAL_PASSWORD)"
                    .to_string(),
            )
            .into());
        }

        load_client_secrets(&self.settings.credentials_path).await?;
        Ok(())
    }

    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        self.check_prerequisites().await?;

        let report = self.harvest().await?;
        let upload = self.upload(&report.staging_dir).await?;

        let summary = RunSummary {
            pages_processed: report.pages_processed,
            harvested: report.downloaded(),
            harvest_failures: report.failed(),
            upload,
        };
        log_summary(&summary);
        Ok(summary)
    }

    pub async fn harvest(&self) -> anyhow::Result<HarvestReport> {
        let portal = WebDriverPortal::connect(
            &self.settings.webdriver_url,
            self.settings.headless,
            self.client.clone(),
        )
        .await?;

        self.harvest_with(&portal).await
    }

    pub async fn harvest_with<P: Portal + ?Sized>(
        &self,
        portal: &P,
    ) -> anyhow::Result<HarvestReport> {
        let result = self.harvest_pass(portal).await;
        if let Err(err) = portal.close().await {
            warn!(error = %err, "failed to close the browser session");
        }
        result
    }

    async fn harvest_pass<P: Portal + ?Sized>(&self, portal: &P) -> anyhow::Result<HarvestReport> {
        let staging_dir = self.settings.staging_dir.clone();
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .with_context(|| format!("failed to create staging folder {}", staging_dir.display()))?;

        let navigator_config = NavigatorConfig::from_settings(&self.settings);
        let harvester_config = HarvesterConfig {
            layout: self.settings.layout.clone(),
            staging_dir: staging_dir.clone(),
            step_timeout: self.settings.step_timeout(),
            poll_interval: self.settings.poll_interval(),
            download_timeout: Duration::from_millis(self.settings.download_timeout_ms),
        };
        let observer = self.observer.as_ref();
        let navigator = SessionNavigator::new(portal, &navigator_config, observer);
        let harvester = ItemHarvester::new(portal, &harvester_config, observer);

        let mut session = navigator
            .authenticate(&self.settings.portal_credentials())
            .await?;
        let mut page = navigator.run_search(&mut session, &self.settings.search).await?;

        let mut artifacts = Vec::new();
        loop {
            artifacts.extend(harvester.harvest_page(&page).await);
            match navigator.next_page(&mut session, &page).await? {
                Some(next) => page = next,
                None => break,
            }
        }

        let done_reason = session.done_reason().unwrap_or(DoneReason::NoNextPage);
        if done_reason == DoneReason::NoItems && artifacts.is_empty() {
            warn!("search returned no CVs");
        }

        Ok(HarvestReport {
            pages_processed: session.pages_visited(),
            done_reason,
            staging_dir,
            artifacts,
        })
    }

    pub async fn upload(&self, staging_dir: &Path) -> anyhow::Result<UploadSummary> {
        let observer = self.observer.as_ref();
        if eligible_documents(staging_dir).await?.is_empty() {
            observer.on_event(&RunEvent::FilesDiscovered { count: 0 });
            observer.on_event(&RunEvent::NothingToUpload);
            return Ok(UploadSummary::default());
        }

        let mut store = self.credential_store().await?;
        let client = self.client.clone();
        self.upload_authorized(
            &mut store,
            |access_token| GoogleDriveClient::new(client.clone(), access_token),
            staging_dir,
        )
        .await
    }

    /// Uploads with a token from `tokens`. A 401 from the destination gets
    /// one fresh consent and a single retry with a new client.
    pub async fn upload_authorized<T, S, F>(
        &self,
        tokens: &mut T,
        connect: F,
        staging_dir: &Path,
    ) -> anyhow::Result<UploadSummary>
    where
        T: AccessTokenSource + ?Sized,
        S: StorageDestination,
        F: Fn(String) -> S,
    {
        let observer = self.observer.as_ref();
        let token = tokens.authorize(observer).await?;
        let storage = connect(token.access_token);

        match self.upload_with(&storage, staging_dir).await {
            Err(err) if is_unauthorized(&err) => {
                warn!("Google Drive rejected the stored token, asking for consent again");
                let token = tokens.consent(observer).await?;
                let storage = connect(token.access_token);
                self.upload_with(&storage, staging_dir).await
            }
            other => other,
        }
    }

    pub async fn upload_with<S: StorageDestination + ?Sized>(
        &self,
        storage: &S,
        staging_dir: &Path,
    ) -> anyhow::Result<UploadSummary> {
        let config = UploadConfig {
            folder_prefix: self.settings.destination_prefix.clone(),
            parent_folder_id: self.settings.drive_parent_folder_id.clone(),
            pacing: self.settings.upload_pacing(),
        };
        let mut coordinator = UploadCoordinator::new(storage, config, self.observer.as_ref());
        coordinator
            .run(staging_dir, Local::now().date_naive())
            .await
    }

    pub async fn auth_status(&self) -> anyhow::Result<AuthStatus> {
        self.credential_store().await?.status().await
    }

    pub async fn ensure_authorized(&self) -> anyhow::Result<AuthStatus> {
        let mut store = self.credential_store().await?;
        store.authorize(self.observer.as_ref()).await?;
        store.status().await
    }

    async fn credential_store(&self) -> anyhow::Result<CredentialStore> {
        let secrets = load_client_secrets(&self.settings.credentials_path).await?;
        Ok(CredentialStore::new(
            self.client.clone(),
            secrets,
            CredentialConfig::from_settings(&self.settings),
        ))
    }
}

fn is_unauthorized(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<CoreError>(),
        Some(CoreError::GoogleApi { status: 401, .. })
    )
}

pub fn log_summary(summary: &RunSummary) {
    info!(
        pages = summary.pages_processed,
        harvested = summary.harvested,
        harvest_failures = summary.harvest_failures,
        uploaded = summary.upload.uploaded,
        total = summary.upload.total,
        destination = summary.upload.destination_name.as_deref().unwrap_or("-"),
        link = summary.upload.destination_link.as_deref().unwrap_or("-"),
        "run finished"
    );
}
