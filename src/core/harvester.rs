use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use super::errors::CoreError;
use super::models::{CvArtifact, DownloadOutcome, PortalLayout, ResultPage};
use super::observer::{RunEvent, RunObserver};
use super::portal::{ControlDescriptor, Portal};
use super::sanitize::{fallback_name, sanitize_file_name};
use super::wait::wait_for_control;

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub layout: PortalLayout,
    pub staging_dir: PathBuf,
    pub step_timeout: Duration,
    pub poll_interval: Duration,
    pub download_timeout: Duration,
}

struct ItemProgress {
    display_name: String,
    opened: bool,
}

pub struct ItemHarvester<'a, P: Portal + ?Sized> {
    portal: &'a P,
    config: &'a HarvesterConfig,
    observer: &'a dyn RunObserver,
}

impl<'a, P: Portal + ?Sized> ItemHarvester<'a, P> {
    pub fn new(portal: &'a P, config: &'a HarvesterConfig, observer: &'a dyn RunObserver) -> Self {
        Self {
            portal,
            config,
            observer,
        }
    }

    pub async fn harvest_page(&self, page: &ResultPage) -> Vec<CvArtifact> {
        let mut artifacts = Vec::with_capacity(page.item_count);

        for slot in 0..page.item_count {
            let index = slot + 1;
            self.observer.on_event(&RunEvent::ItemStarted {
                page: page.number,
                index,
                total: page.item_count,
            });

            let mut progress = ItemProgress {
                display_name: fallback_name(page.number, index),
                opened: false,
            };
            let result = self.harvest_item(page.number, slot, &mut progress).await;

            let file_name = sanitize_file_name(Some(&progress.display_name), page.number, index);
            let path = self.config.staging_dir.join(&file_name);
            let outcome = match result {
                Ok(()) => {
                    self.observer.on_event(&RunEvent::ItemDownloaded {
                        page: page.number,
                        index,
                        file_name: file_name.clone(),
                    });
                    DownloadOutcome::Downloaded
                }
                Err(err) => {
                    let failure = CoreError::ItemHarvest {
                        page: page.number,
                        index,
                        reason: format!("{err:#}"),
                    };
                    self.observer.on_event(&RunEvent::ItemFailed {
                        page: page.number,
                        index,
                        reason: format!("{err:#}"),
                    });
                    DownloadOutcome::Failed {
                        diagnostic: failure.to_string(),
                        snapshot: self.capture_snapshot(page.number, index).await,
                    }
                }
            };

            // A click can navigate and still report an error, so the page
            // itself decides whether we are off the listing.
            if progress.opened || !self.listing_visible().await {
                self.return_to_listing(page.number, index).await;
            }

            artifacts.push(CvArtifact {
                display_name: progress.display_name,
                file_name,
                page: page.number,
                index,
                path,
                outcome,
            });
        }

        artifacts
    }

    async fn harvest_item(
        &self,
        page: u32,
        slot: usize,
        progress: &mut ItemProgress,
    ) -> anyhow::Result<()> {
        let layout = &self.config.layout;

        // Handles die on navigation, so the entry is looked up again every time.
        if !self.wait_for(&layout.view_document, slot + 1).await {
            anyhow::bail!("listing no longer shows entry {}", slot + 1);
        }

        self.portal
            .click(&layout.view_document, slot)
            .await
            .context("failed to open CV")?;
        progress.opened = true;

        if !self.wait_for(&layout.download, 1).await {
            anyhow::bail!("download control did not appear");
        }

        if self.portal.count(&layout.document_title).await? > 0 {
            if let Some(title) = self.portal.text(&layout.document_title).await? {
                let title = title.trim();
                if !title.is_empty() {
                    progress.display_name = title.to_string();
                }
            }
        }

        let file_name = sanitize_file_name(Some(&progress.display_name), page, slot + 1);
        let bytes = tokio::time::timeout(
            self.config.download_timeout,
            self.portal.download(&layout.download),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "download did not complete within {:?}",
                self.config.download_timeout
            )
        })??;

        let path = self.config.staging_dir.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(())
    }

    async fn capture_snapshot(&self, page: u32, index: usize) -> Option<PathBuf> {
        let path = snapshot_path(&self.config.staging_dir, page, index);
        let written = async {
            let image = self.portal.screenshot().await?;
            tokio::fs::write(&path, image).await?;
            anyhow::Ok(())
        }
        .await;

        match written {
            Ok(()) => Some(path),
            Err(err) => {
                tracing::debug!(page, index, error = %err, "diagnostic snapshot skipped");
                None
            }
        }
    }

    async fn return_to_listing(&self, page: u32, index: usize) {
        if let Err(err) = self.portal.go_back().await {
            tracing::warn!(page, index, error = %err, "could not navigate back to the listing");
            return;
        }

        if !self.wait_for(&self.config.layout.view_document, 1).await {
            tracing::warn!(page, index, "listing did not reappear after going back");
        }
    }

    async fn listing_visible(&self) -> bool {
        matches!(
            self.portal.count(&self.config.layout.view_document).await,
            Ok(count) if count > 0
        )
    }

    async fn wait_for(&self, control: &ControlDescriptor, min_count: usize) -> bool {
        wait_for_control(
            self.portal,
            control,
            min_count,
            self.config.step_timeout,
            self.config.poll_interval,
        )
        .await
    }
}

pub fn snapshot_path(staging_dir: &Path, page: u32, index: usize) -> PathBuf {
    staging_dir.join(format!("erreur_p{page}_cv{index}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observer::testing::RecordingObserver;
    use crate::core::portal::testing::{FakeItem, FakePortal};

    fn config(staging_dir: &Path) -> HarvesterConfig {
        HarvesterConfig {
            layout: PortalLayout::default(),
            staging_dir: staging_dir.to_path_buf(),
            step_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            download_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn untitled_entries_fall_back_to_positional_names() {
        let temp = tempfile::tempdir().unwrap();
        let portal = FakePortal::new(vec![vec![FakeItem::untitled(); 3]]).on_listing();
        let config = config(temp.path());
        let observer = RecordingObserver::default();
        let harvester = ItemHarvester::new(&portal, &config, &observer);

        let artifacts = harvester
            .harvest_page(&ResultPage {
                number: 4,
                item_count: 3,
            })
            .await;

        let names: Vec<_> = artifacts.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(names, vec!["cv_p4_1", "cv_p4_2", "cv_p4_3"]);
        assert!(artifacts.iter().all(CvArtifact::is_downloaded));
        assert!(temp.path().join("cv_p4_2_p4.pdf").exists());
        assert_eq!(portal.back_calls(), 3);
    }

    #[tokio::test]
    async fn failures_are_recorded_without_skipping_entries() {
        let temp = tempfile::tempdir().unwrap();
        let portal = FakePortal::new(vec![vec![
            FakeItem::titled("Marie Curie"),
            FakeItem::broken_download("Paul Martin"),
            FakeItem::unopenable(),
            FakeItem::titled("Léa Petit"),
        ]])
        .on_listing();
        let config = config(temp.path());
        let observer = RecordingObserver::default();
        let harvester = ItemHarvester::new(&portal, &config, &observer);

        let artifacts = harvester
            .harvest_page(&ResultPage {
                number: 2,
                item_count: 4,
            })
            .await;

        assert_eq!(artifacts.len(), 4);
        let indices: Vec<_> = artifacts.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);

        assert!(artifacts[0].is_downloaded());
        assert_eq!(artifacts[0].file_name, "Marie_Curie_p2.pdf");
        assert_eq!(
            std::fs::read(temp.path().join("Marie_Curie_p2.pdf")).unwrap(),
            b"%PDF Marie Curie"
        );

        assert_eq!(artifacts[1].display_name, "Paul Martin");
        match &artifacts[1].outcome {
            DownloadOutcome::Failed {
                diagnostic,
                snapshot,
            } => {
                assert!(diagnostic.contains("download never started"));
                assert_eq!(
                    snapshot.as_deref(),
                    Some(snapshot_path(temp.path(), 2, 2).as_path())
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(snapshot_path(temp.path(), 2, 2).exists());
        assert!(!temp.path().join("Paul_Martin_p2.pdf").exists());

        assert_eq!(artifacts[2].display_name, "cv_p2_3");
        assert!(!artifacts[2].is_downloaded());
        assert!(snapshot_path(temp.path(), 2, 3).exists());

        assert!(artifacts[3].is_downloaded());
        // Only entries whose detail view opened need a way back.
        assert_eq!(portal.back_calls(), 3);

        let failures = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, RunEvent::ItemFailed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn click_that_navigates_then_errors_still_returns_to_the_listing() {
        let temp = tempfile::tempdir().unwrap();
        let portal = FakePortal::new(vec![vec![
            FakeItem::opens_with_error("Anne Roy"),
            FakeItem::titled("Marc Blanc"),
            FakeItem::titled("Zoé Noir"),
        ]])
        .on_listing();
        let config = config(temp.path());
        let observer = RecordingObserver::default();
        let harvester = ItemHarvester::new(&portal, &config, &observer);

        let artifacts = harvester
            .harvest_page(&ResultPage {
                number: 1,
                item_count: 3,
            })
            .await;

        let outcomes: Vec<_> = artifacts.iter().map(CvArtifact::is_downloaded).collect();
        assert_eq!(outcomes, vec![false, true, true]);
        assert_eq!(portal.back_calls(), 3);
        assert!(temp.path().join("Zoé_Noir_p1.pdf").exists());
        assert!(snapshot_path(temp.path(), 1, 1).exists());
    }
}
