use std::io;
use std::path::{Path, PathBuf};

use docshelf_core::{DocshelfClient, DocshelfError};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("api error: {0}")]
    Api(#[from] DocshelfError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Streams a remote file to `target`, writing a `.partial` sibling first
/// and renaming once the body is fully on disk, so an interrupted pass
/// never leaves a torn file that looks current.
pub async fn download_to_path(
    client: &DocshelfClient,
    file_id: &str,
    target: &Path,
) -> Result<(), TransferError> {
    let response = client.download_file(file_id).await?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(target);
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    tokio::fs::rename(partial, target).await?;
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn downloads_into_nested_target_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/files/d1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("Reports/q1.pdf");
        let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();

        download_to_path(&client, "d1", &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!target.with_extension("pdf.partial").exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_final_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/files/d1/download"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("q1.pdf");
        let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();

        let err = download_to_path(&client, "d1", &target)
            .await
            .expect_err("expected failure");

        assert!(matches!(err, TransferError::Api(_)));
        assert!(!target.exists());
    }
}
