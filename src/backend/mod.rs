use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::{self, ConfigError};
use crate::container::TargetContainer;
use crate::error::{PersistError, UploadError};
use crate::model::{GalleryEntry, MediaAsset, OrderAssignment, SourceFile};

pub mod model;

use model::{check_persist_status, parse_gallery_response, UploadResponse};

/// One binary plus a target container in, a publicly resolvable URL out.
/// Every non-success response is an `Err` for that item.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(&self, file: &SourceFile, container: &TargetContainer) -> Result<String, UploadError>;
}

/// Gallery-metadata upsert for one parent record, addressed by its
/// container path (`dishes/42`). Returns the assets as the server stored
/// them.
#[async_trait]
pub trait GalleryStore: Send + Sync {
    async fn upsert_gallery(
        &self,
        parent: &str,
        entries: &[GalleryEntry],
    ) -> Result<Vec<MediaAsset>, PersistError>;
}

/// Reorder endpoint for one ordered list.
#[async_trait]
pub trait ReorderService<Id: Send + Sync + 'static>: Send + Sync {
    async fn persist_order(&self, list: &str, assignments: &[OrderAssignment<Id>]) -> Result<(), PersistError>;
}

/// reqwest-backed implementation of every remote collaborator.
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("gallery-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            token,
        })
    }

    pub fn from_config(cfg: &config::Backend) -> Result<Self, ConfigError> {
        let base_url = Url::parse(cfg.base_url.trim())
            .map_err(|_| ConfigError::Invalid("backend.base_url must be an absolute URL"))?;
        let token = cfg.bearer_token().map(str::to_string);
        Ok(Self::new(
            base_url,
            token,
            Duration::from_secs(cfg.timeout_seconds),
        )?)
    }

    fn endpoint(&self, path: &str) -> Result<Url, String> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| format!("invalid endpoint {path:?}: {e}"))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    pub fn build_upload_request(
        &self,
        file: &SourceFile,
        container: &TargetContainer,
    ) -> Result<reqwest::Request, UploadError> {
        let endpoint = self.endpoint("uploads").map_err(UploadError::transport)?;
        let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|e| UploadError::transport(format!("invalid mime {:?}: {e}", file.mime)))?;
        let form = reqwest::multipart::Form::new()
            .text("container", container.to_string())
            .part("file", part);
        self.authorize(self.http.post(endpoint))
            .multipart(form)
            .build()
            .map_err(UploadError::transport)
    }

    pub fn build_gallery_request(
        &self,
        parent: &str,
        entries: &[GalleryEntry],
    ) -> Result<reqwest::Request, PersistError> {
        let endpoint = self
            .endpoint(&format!("{}/gallery", parent.trim_matches('/')))
            .map_err(PersistError::Transport)?;
        self.authorize(self.http.put(endpoint))
            .json(entries)
            .build()
            .map_err(|e| PersistError::Transport(e.to_string()))
    }

    pub fn build_reorder_request<Id: Serialize>(
        &self,
        list: &str,
        assignments: &[OrderAssignment<Id>],
    ) -> Result<reqwest::Request, PersistError> {
        let endpoint = self
            .endpoint(&format!("{}/order", list.trim_matches('/')))
            .map_err(PersistError::Transport)?;
        self.authorize(self.http.put(endpoint))
            .json(assignments)
            .build()
            .map_err(|e| PersistError::Transport(e.to_string()))
    }

    async fn execute(&self, request: reqwest::Request) -> Result<(reqwest::StatusCode, String), reqwest::Error> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "backend request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.text().await?;
        if status.is_success() {
            debug!(%method, %url, %status, "backend response");
        } else {
            warn!(%method, %url, %status, body = %body, "backend error response");
        }
        Ok((status, body))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl UploadTransport for HttpBackend {
    #[instrument(skip_all, fields(name = %file.name, %container))]
    async fn upload(&self, file: &SourceFile, container: &TargetContainer) -> Result<String, UploadError> {
        let request = self.build_upload_request(file, container)?;
        let (status, body) = self
            .execute(request)
            .await
            .map_err(UploadError::transport)?;
        let url = UploadResponse::parse(status, &body)?.into_result()?;
        info!(%url, "upload stored");
        Ok(url)
    }
}

#[async_trait]
impl GalleryStore for HttpBackend {
    #[instrument(skip_all, fields(%parent, entries = entries.len()))]
    async fn upsert_gallery(
        &self,
        parent: &str,
        entries: &[GalleryEntry],
    ) -> Result<Vec<MediaAsset>, PersistError> {
        let request = self.build_gallery_request(parent, entries)?;
        let (status, body) = self
            .execute(request)
            .await
            .map_err(|e| PersistError::Transport(e.to_string()))?;
        parse_gallery_response(status, &body)
    }
}

#[async_trait]
impl<Id> ReorderService<Id> for HttpBackend
where
    Id: Serialize + Send + Sync + 'static,
{
    #[instrument(skip_all, fields(list = %list, items = assignments.len()))]
    async fn persist_order(&self, list: &str, assignments: &[OrderAssignment<Id>]) -> Result<(), PersistError> {
        let request = self.build_reorder_request(list, assignments)?;
        let (status, body) = self
            .execute(request)
            .await
            .map_err(|e| PersistError::Transport(e.to_string()))?;
        check_persist_status(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(token: Option<&str>) -> HttpBackend {
        HttpBackend::new(
            Url::parse("https://api.example.com/v1").unwrap(),
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|h| h.to_str().ok())
    }

    #[test]
    fn upload_request_is_multipart_post() {
        let client = backend(Some("secret"));
        let file = SourceFile::new("a.png", "image/png", vec![1u8, 2, 3]);
        let container = TargetContainer::parse("dishes/4").unwrap();
        let request = client.build_upload_request(&file, &container).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/uploads");
        assert_eq!(header(&request, "Authorization"), Some("Bearer secret"));
        assert!(header(&request, "Content-Type")
            .unwrap()
            .starts_with("multipart/form-data"));
    }

    #[test]
    fn upload_request_rejects_bad_mime() {
        let client = backend(None);
        let file = SourceFile::new("a.png", "not a mime", vec![1u8]);
        let container = TargetContainer::parse("dishes/4").unwrap();
        assert!(matches!(
            client.build_upload_request(&file, &container),
            Err(UploadError::Transport { .. })
        ));
    }

    #[test]
    fn gallery_request_puts_entries() {
        let client = backend(None);
        let entries = vec![GalleryEntry {
            url: "https://cdn/a.jpg".into(),
            alt_text: "a".into(),
            is_primary: true,
            display_order: 0,
        }];
        let request = client.build_gallery_request("dishes/4", &entries).unwrap();
        assert_eq!(request.method(), reqwest::Method::PUT);
        assert_eq!(request.url().path(), "/v1/dishes/4/gallery");
        assert!(header(&request, "Authorization").is_none());
        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body[0]["altText"], "a");
        assert_eq!(body[0]["isPrimary"], true);
        assert_eq!(body[0]["displayOrder"], 0);
    }

    #[test]
    fn reorder_request_carries_assignments() {
        let client = backend(Some("t"));
        let assignments = vec![
            OrderAssignment {
                item_id: "d".to_string(),
                new_order: 0,
            },
            OrderAssignment {
                item_id: "a".to_string(),
                new_order: 1,
            },
        ];
        let request = client.build_reorder_request("lists/7", &assignments).unwrap();
        assert_eq!(request.url().path(), "/v1/lists/7/order");
        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body[0]["itemId"], "d");
        assert_eq!(body[1]["newOrder"], 1);
    }
}
