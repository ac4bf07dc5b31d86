use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControlDescriptor {
    pub css: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ControlDescriptor {
    pub fn css(css: &str) -> Self {
        Self {
            css: css.to_string(),
            text: None,
        }
    }

    pub fn with_text(css: &str, text: &str) -> Self {
        Self {
            css: css.to_string(),
            text: Some(text.to_string()),
        }
    }

    pub fn matches_text(&self, candidate: &str) -> bool {
        match self.text.as_deref() {
            Some(needle) => candidate.contains(needle),
            None => true,
        }
    }
}

impl std::fmt::Display for ControlDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{} (text \"{}\")", self.css, text),
            None => f.write_str(&self.css),
        }
    }
}

#[async_trait]
pub trait Portal: Send + Sync {
    async fn goto(&self, url: &str) -> anyhow::Result<()>;

    async fn count(&self, control: &ControlDescriptor) -> anyhow::Result<usize>;

    async fn click(&self, control: &ControlDescriptor, nth: usize) -> anyhow::Result<()>;

    async fn fill(&self, control: &ControlDescriptor, value: &str) -> anyhow::Result<()>;

    async fn type_slowly(
        &self,
        control: &ControlDescriptor,
        value: &str,
        per_key: Duration,
    ) -> anyhow::Result<()>;

    async fn press_enter(&self, control: &ControlDescriptor) -> anyhow::Result<()>;

    async fn select_by_label(&self, control: &ControlDescriptor, label: &str)
        -> anyhow::Result<()>;

    async fn text(&self, control: &ControlDescriptor) -> anyhow::Result<Option<String>>;

    /// Triggers the download behind `control` and resolves once the full
    /// document body is available.
    async fn download(&self, control: &ControlDescriptor) -> anyhow::Result<Vec<u8>>;

    async fn go_back(&self) -> anyhow::Result<()>;

    async fn screenshot(&self) -> anyhow::Result<Vec<u8>>;

    async fn close(&self) -> anyhow::Result<()>;
}
