//! Google Drive v3 source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use photoblog_shared::{
    MediaItem, PhotoblogError, Result, SourceConfig, excerpt, resolve_drive_token,
};

use crate::{MediaSource, ensure_not_fetched, store_fetched};

const USER_AGENT: &str = concat!("Photoblog/", env!("CARGO_PKG_VERSION"));

/// Page size for `files.list`.
const PAGE_SIZE: &str = "200";

const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
    modified_time: DateTime<Utc>,
}

/// Reads photos from one Drive folder and context notes from another.
pub struct DriveSource {
    client: Client,
    base_url: String,
    token: String,
    input_folder_id: String,
    text_folder_id: Option<String>,
}

impl DriveSource {
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        input_folder_id: impl Into<String>,
        text_folder_id: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PhotoblogError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            input_folder_id: input_folder_id.into(),
            text_folder_id,
        })
    }

    /// Build from `[source]`, reading the access token from its env var.
    pub fn from_config(config: &SourceConfig, timeout_secs: u64) -> Result<Self> {
        let folder = config
            .input_folder_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PhotoblogError::config("source.input_folder_id is required"))?;
        let token = resolve_drive_token(config)?;

        Self::new(
            &config.base_url,
            token,
            folder,
            config.input_text_folder_id.clone(),
            timeout_secs,
        )
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.base_url)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).bearer_auth(&self.token)
    }

    /// Send a request and return the body bytes, mapping failures to source errors.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Vec<u8>> {
        let response = request
            .send()
            .await
            .map_err(|e| PhotoblogError::Network(format!("drive {what}: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                PhotoblogError::Network(format!("drive {what}: failed to read body: {e}"))
            })?;

        if !status.is_success() {
            return Err(PhotoblogError::Source(format!(
                "drive {what}: HTTP {status}: {}",
                excerpt(&String::from_utf8_lossy(&body))
            )));
        }
        Ok(body.to_vec())
    }

    async fn list(
        &self,
        query: &str,
        order_by: Option<&str>,
        page_size: &str,
    ) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.to_string()),
                ("fields", "nextPageToken,files(id,name,mimeType,modifiedTime)".to_string()),
                ("pageSize", page_size.to_string()),
            ];
            if let Some(order) = order_by {
                params.push(("orderBy", order.to_string()));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let body = self.send(self.get(&self.files_url()).query(&params), "files.list").await?;
            let page: FileList = serde_json::from_slice(&body).map_err(|e| {
                PhotoblogError::Source(format!("drive files.list: unexpected response: {e}"))
            })?;
            files.extend(page.files);

            // A single page is enough when asking for the newest document.
            match page.next_page_token {
                Some(next) if order_by.is_none() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl MediaSource for DriveSource {
    fn name(&self) -> &str {
        "drive"
    }

    #[instrument(skip_all, fields(folder = %self.input_folder_id))]
    async fn list_images(&self) -> Result<Vec<MediaItem>> {
        let query = format!(
            "'{}' in parents and trashed = false and mimeType contains 'image/'",
            self.input_folder_id
        );
        let mut files = self.list(&query, None, PAGE_SIZE).await?;
        files.retain(|f| f.mime_type.starts_with("image/"));
        files.sort_by(|a, b| a.modified_time.cmp(&b.modified_time).then_with(|| a.id.cmp(&b.id)));

        info!(count = files.len(), "listed drive images");
        Ok(files
            .into_iter()
            .map(|f| MediaItem::new(f.id, f.name, f.mime_type, f.modified_time))
            .collect())
    }

    #[instrument(skip_all, fields(id = %item.id))]
    async fn fetch(&self, item: &mut MediaItem, dest_dir: &Path) -> Result<PathBuf> {
        ensure_not_fetched(item)?;

        let url = format!("{}/{}", self.files_url(), item.id);
        let data = self
            .send(self.get(&url).query(&[("alt", "media")]), "download")
            .await?;

        let path = store_fetched(item, dest_dir, &data).await?;
        debug!(path = %path.display(), bytes = data.len(), "downloaded image");
        Ok(path)
    }

    #[instrument(skip_all)]
    async fn load_context_note(&self) -> Result<Option<String>> {
        let Some(folder) = &self.text_folder_id else {
            return Ok(None);
        };

        let query =
            format!("'{folder}' in parents and mimeType = '{GOOGLE_DOC_MIME}' and trashed = false");
        let files = self.list(&query, Some("modifiedTime desc"), "1").await?;
        let Some(doc) = files.into_iter().next() else {
            return Ok(None);
        };
        info!(name = %doc.name, "using context note");

        let url = format!("{}/{}/export", self.files_url(), doc.id);
        let body = self
            .send(self.get(&url).query(&[("mimeType", "text/plain")]), "export")
            .await?;

        // Drive prefixes plain-text exports with a BOM.
        let text = String::from_utf8_lossy(&body)
            .trim_start_matches('\u{feff}')
            .trim()
            .to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer, text_folder: Option<&str>) -> DriveSource {
        DriveSource::new(&server.uri(), "tok", "photos", text_folder.map(String::from), 5).unwrap()
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("pb-drive-{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn lists_images_oldest_first_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(header("authorization", "Bearer tok"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"files":[
                    {"id":"b","name":"b.jpg","mimeType":"image/jpeg","modifiedTime":"2024-03-02T10:00:00.000Z"},
                    {"id":"x","name":"notes.pdf","mimeType":"application/pdf","modifiedTime":"2024-01-01T00:00:00Z"}
                ],"nextPageToken":"p2"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"files":[
                    {"id":"a","name":"a.png","mimeType":"image/png","modifiedTime":"2024-03-01T10:00:00Z"}
                ]}"#,
            ))
            .mount(&server)
            .await;

        let items = source(&server, None).list_images().await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(items.iter().all(|i| i.local_path().is_none()));
    }

    #[tokio::test]
    async fn fetch_downloads_and_attaches_path_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/abc"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = temp_dir();
        let src = source(&server, None);
        let mut item = MediaItem::new("abc", "beach:day.jpg", "image/jpeg", Utc::now());

        let local = src.fetch(&mut item, &dir).await.unwrap();
        assert_eq!(local, dir.join("abc_beach_day.jpg"));
        assert_eq!(std::fs::read(&local).unwrap(), vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(item.local_path(), Some(local.as_path()));

        let err = src.fetch(&mut item, &dir).await.unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn same_named_photos_do_not_overwrite_each_other() {
        let server = MockServer::start().await;
        for (id, body) in [("id1", "FIRST"), ("id2", "SECOND")] {
            Mock::given(method("GET"))
                .and(path(format!("/drive/v3/files/{id}")))
                .and(query_param("alt", "media"))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let dir = temp_dir();
        let src = source(&server, None);
        let mut a = MediaItem::new("id1", "image.jpg", "image/jpeg", Utc::now());
        let mut b = MediaItem::new("id2", "image.jpg", "image/jpeg", Utc::now());

        let a_path = src.fetch(&mut a, &dir).await.unwrap();
        let b_path = src.fetch(&mut b, &dir).await.unwrap();

        assert_ne!(a_path, b_path);
        assert_eq!(std::fs::read(&a_path).unwrap(), b"FIRST");
        assert_eq!(std::fs::read(&b_path).unwrap(), b"SECOND");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn http_error_is_source_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("insufficient scope"))
            .mount(&server)
            .await;

        let err = source(&server, None).list_images().await.unwrap_err();
        assert_eq!(err.kind(), "SourceError");
        assert!(err.to_string().contains("insufficient scope"));
    }

    #[tokio::test]
    async fn context_note_exports_newest_doc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("orderBy", "modifiedTime desc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"files":[{"id":"doc1","name":"weekend","modifiedTime":"2024-03-01T10:00:00Z"}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/doc1/export"))
            .and(query_param("mimeType", "text/plain"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("\u{feff}  went to the coast  \n"),
            )
            .mount(&server)
            .await;

        let note = source(&server, Some("notes")).load_context_note().await.unwrap();
        assert_eq!(note.as_deref(), Some("went to the coast"));
    }

    #[tokio::test]
    async fn no_text_folder_means_no_note() {
        let server = MockServer::start().await;
        assert_eq!(source(&server, None).load_context_note().await.unwrap(), None);
    }
}
