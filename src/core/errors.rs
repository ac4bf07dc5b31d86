use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Portal login failed: {0}")]
    Authentication(String),
    #[error("Portal navigation failed at step '{step}': {reason}")]
    Navigation { step: String, reason: String },
    #[error("Failed to harvest CV {index} on page {page}: {reason}")]
    ItemHarvest {
        page: u32,
        index: usize,
        reason: String,
    },
    #[error("Upload of {file} failed: {reason}")]
    Upload { file: String, reason: String },
    #[error("No OAuth callback received within {seconds} seconds")]
    CredentialTimeout { seconds: u64 },
    #[error("Failed to clean local staging folder: {0}")]
    LocalCleanup(String),
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),
    #[error("Google API request failed with status {status}: {body}")]
    GoogleApi { status: u16, body: String },
    #[error("Browser automation error: {0}")]
    Portal(String),
}

impl CoreError {
    pub fn navigation(step: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Navigation {
            step: step.into(),
            reason: reason.into(),
        }
    }
}
