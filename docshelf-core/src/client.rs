use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum DocshelfError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Thin client for the Docshelf document-store REST API. The server is
/// self-hosted, so the base URL is always supplied by the caller.
#[derive(Clone)]
pub struct DocshelfClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DocshelfClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, DocshelfError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Full remote folder hierarchy. Nodes without an `id` are virtual
    /// grouping nodes that only exist for presentation.
    pub async fn folder_tree(&self) -> Result<Vec<FolderNode>, DocshelfError> {
        let url = self.endpoint("/api/folders/tree")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_folders(&self, parent_id: &str) -> Result<Vec<FolderRecord>, DocshelfError> {
        let mut url = self.endpoint("/api/folders")?;
        url.query_pairs_mut().append_pair("parentId", parent_id);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Looks up a direct child folder by name under `parent_id`.
    pub async fn find_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<FolderRecord>, DocshelfError> {
        let folders = self.list_folders(parent_id).await?;
        Ok(folders.into_iter().find(|folder| folder.name == name))
    }

    /// Creates a folder under `parent_id`. The server answers 409 when a
    /// sibling with the same name already exists.
    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<FolderRecord, DocshelfError> {
        let url = self.endpoint("/api/folders")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&CreateFolderRequest { name, parent_id })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_folder(&self, folder_id: &str) -> Result<(), DocshelfError> {
        let url = self.endpoint(&format!("/api/folders/{folder_id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::expect_no_content(response).await
    }

    pub async fn list_files(&self, folder_id: &str) -> Result<Vec<FileRecord>, DocshelfError> {
        let mut url = self.endpoint("/api/files")?;
        url.query_pairs_mut().append_pair("folderId", folder_id);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Uploads file bytes tagged with the owning folder id. The body may be
    /// a streamed `reqwest::Body`; nothing is buffered here.
    pub async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<FileRecord, DocshelfError> {
        let url = self.endpoint("/api/files")?;
        let part = reqwest::multipart::Part::stream(body).file_name(name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("folderId", folder_id.to_string())
            .part("file", part);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .multipart(form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), DocshelfError> {
        let url = self.endpoint(&format!("/api/files/{file_id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::expect_no_content(response).await
    }

    /// Returns the raw download response; callers stream the body.
    pub async fn download_file(&self, file_id: &str) -> Result<reqwest::Response, DocshelfError> {
        let url = self.endpoint(&format!("/api/files/{file_id}/download"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DocshelfError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DocshelfError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn expect_no_content(response: reqwest::Response) -> Result<(), DocshelfError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> DocshelfError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        DocshelfError::Api { status, body }
    }
}

impl DocshelfError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DocshelfError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    /// "Already exists" answer from folder creation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DocshelfError::Api { status, .. } if *status == StatusCode::CONFLICT)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DocshelfError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFolderRequest<'a> {
    name: &'a str,
    parent_id: &'a str,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FolderNode {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub children: Vec<FolderNode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
    pub folder_id: String,
}
