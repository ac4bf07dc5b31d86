use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::errors::CoreError;

const DRIVE_FILES_ENDPOINT: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const PDF_MIME: &str = "application/pdf";
pub const DOC_MIME: &str = "application/msword";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub fn document_mime(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => Some(PDF_MIME),
        "doc" => Some(DOC_MIME),
        "docx" => Some(DOCX_MIME),
        _ => None,
    }
}

#[async_trait]
pub trait StorageDestination: Send + Sync {
    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> anyhow::Result<String>;

    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        parent_id: &str,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: Option<String>,
}

pub struct GoogleDriveClient {
    client: Client,
    access_token: String,
    files_endpoint: String,
    upload_endpoint: String,
}

impl GoogleDriveClient {
    pub fn new(client: Client, access_token: String) -> Self {
        Self {
            client,
            access_token,
            files_endpoint: DRIVE_FILES_ENDPOINT.to_string(),
            upload_endpoint: DRIVE_UPLOAD_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoints(mut self, files_endpoint: &str, upload_endpoint: &str) -> Self {
        self.files_endpoint = files_endpoint.to_string();
        self.upload_endpoint = upload_endpoint.to_string();
        self
    }

    async fn parse_created(response: reqwest::Response, what: &str) -> anyhow::Result<String> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CoreError::GoogleApi {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let created = serde_json::from_str::<CreatedFile>(&body)
            .with_context(|| format!("failed to parse Google Drive {what} response"))?;

        created
            .id
            .ok_or_else(|| anyhow::anyhow!("Google Drive {what} response missing id"))
    }
}

#[async_trait]
impl StorageDestination for GoogleDriveClient {
    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> anyhow::Result<String> {
        let mut metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME,
        });
        if let Some(parent) = parent_id {
            metadata["parents"] = json!([parent]);
        }

        let response = self
            .client
            .post(&self.files_endpoint)
            .bearer_auth(&self.access_token)
            .query(&[("fields", "id")])
            .json(&metadata)
            .send()
            .await?;

        Self::parse_created(response, "folder").await
    }

    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        parent_id: &str,
    ) -> anyhow::Result<String> {
        let metadata = json!({
            "name": name,
            "parents": [parent_id],
        });
        let boundary = format!("cv-harvester-{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, mime_type, &bytes);

        let response = self
            .client
            .post(&self.upload_endpoint)
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;

        Self::parse_created(response, "upload").await
    }
}

fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
