//! REST gateway over HTTP.

use async_trait::async_trait;
use reqwest::{header, multipart, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use spotsync_common::{EntityFamily, EntityId, Error, Result};

use crate::config::GatewayConfig;
use crate::gateway::{server_id, ListQuery, PhotoUpload, RemoteGateway, RemotePage};
use crate::retry::{Idempotency, RetryExecutor};

const USER_AGENT: &str = concat!("SpotSync/", env!("CARGO_PKG_VERSION"));

/// List bodies come either wrapped with a total or as a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Paged {
        items: Vec<Value>,
        #[serde(default)]
        total: Option<usize>,
    },
    Bare(Vec<Value>),
}

impl From<ListResponse> for RemotePage {
    fn from(response: ListResponse) -> Self {
        match response {
            ListResponse::Paged { items, total } => RemotePage { items, total },
            ListResponse::Bare(items) => RemotePage { items, total: None },
        }
    }
}

/// Gateway talking to the spot service REST API.
pub struct HttpGateway {
    http: Client,
    base_url: Url,
    api_token: Option<String>,
    retry: RetryExecutor,
}

impl HttpGateway {
    /// Create a gateway from configuration.
    ///
    /// # Errors
    /// - `Config` for an unusable base URL or HTTP client setup failure
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.parsed_base_url()?,
            api_token: config.api_token.clone(),
            retry: RetryExecutor::new(config.retry_config()),
        })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid request path '{}': {}", path, e)))
    }

    fn collection_url(&self, family: EntityFamily) -> Result<Url> {
        self.url(family.collection())
    }

    fn item_url(&self, family: EntityFamily, id: EntityId) -> Result<Url> {
        let id = server_id(family, id)?;
        self.url(&format!("{}/{}", family.collection(), id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {}", e)))
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("Failed to parse response: {}", e)))
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(format!("{} not found", response.url().path())))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Remote {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn list(&self, family: EntityFamily, query: &ListQuery) -> Result<RemotePage> {
        let url = &self.collection_url(family)?;
        let label = format!("GET {}", family.collection());
        debug!("GET {} page {} limit {}", url, query.page, query.limit);

        let response: ListResponse = self
            .retry
            .execute(&label, Idempotency::Safe, || async move {
                let request = self
                    .http
                    .get(url.clone())
                    .query(&[("page", query.page), ("limit", query.limit)])
                    .query(&query.params);
                let response = self.send(request).await?;
                self.handle_response(response).await
            })
            .await?;
        Ok(response.into())
    }

    async fn get(&self, family: EntityFamily, id: EntityId) -> Result<Value> {
        let url = &self.item_url(family, id)?;
        let label = format!("GET {}/{}", family.collection(), id);
        self.retry
            .execute(&label, Idempotency::Safe, || async move {
                let response = self.send(self.http.get(url.clone())).await?;
                self.handle_response(response).await
            })
            .await
    }

    async fn create(&self, family: EntityFamily, fields: Value) -> Result<Value> {
        let url = &self.collection_url(family)?;
        let fields = &fields;
        let label = format!("POST {}", family.collection());
        debug!("POST {}", url);
        self.retry
            .execute(&label, Idempotency::Unsafe, || async move {
                let response = self.send(self.http.post(url.clone()).json(fields)).await?;
                self.handle_response(response).await
            })
            .await
    }

    async fn update(&self, family: EntityFamily, id: EntityId, partial: Value) -> Result<Value> {
        let url = &self.item_url(family, id)?;
        let partial = &partial;
        let label = format!("PATCH {}/{}", family.collection(), id);
        debug!("PATCH {}", url);
        self.retry
            .execute(&label, Idempotency::Safe, || async move {
                let response = self.send(self.http.patch(url.clone()).json(partial)).await?;
                self.handle_response(response).await
            })
            .await
    }

    async fn delete(&self, family: EntityFamily, id: EntityId) -> Result<()> {
        let url = &self.item_url(family, id)?;
        let label = format!("DELETE {}/{}", family.collection(), id);
        debug!("DELETE {}", url);
        self.retry
            .execute(&label, Idempotency::Safe, || async move {
                let response = self.send(self.http.delete(url.clone())).await?;
                self.check_status(response).await.map(|_| ())
            })
            .await
    }

    async fn upload_photo(&self, owner_id: EntityId, photo: PhotoUpload) -> Result<()> {
        let id = server_id(EntityFamily::Spot, owner_id)?;
        let url = &self.url(&format!("{}/{}/photos", EntityFamily::Spot.collection(), id))?;
        let mime = mime_for(&photo.file_name);
        let photo = &photo;
        let label = format!("POST {}/{}/photos", EntityFamily::Spot.collection(), id);
        debug!("POST {} ({} bytes)", url, photo.bytes.len());

        self.retry
            .execute(&label, Idempotency::Unsafe, || async move {
                let part = multipart::Part::bytes(photo.bytes.clone())
                    .file_name(photo.file_name.clone())
                    .mime_str(mime)
                    .map_err(|e| Error::InvalidInput(format!("Invalid photo part: {}", e)))?;
                let form = multipart::Form::new()
                    .part("photo", part)
                    .text("is_main", photo.is_main.to_string());
                let response = self.send(self.http.post(url.clone()).multipart(form)).await?;
                self.check_status(response).await.map(|_| ())
            })
            .await
    }

    async fn ping(&self) -> Result<()> {
        let url = self.url("health")?;
        let response = self.send(self.http.get(url)).await?;
        self.check_status(response).await.map(|_| ())
    }
}

/// MIME type guessed from a file extension.
fn mime_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base_url: &str) -> HttpGateway {
        HttpGateway::new(&GatewayConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_urls_resolve_under_base_path() {
        let gateway = gateway("https://spots.example.com/api");
        assert_eq!(
            gateway.collection_url(EntityFamily::Visit).unwrap().as_str(),
            "https://spots.example.com/api/visits"
        );
        assert_eq!(
            gateway
                .item_url(EntityFamily::Spot, EntityId::Committed(42))
                .unwrap()
                .as_str(),
            "https://spots.example.com/api/spots/42"
        );
    }

    #[test]
    fn test_item_url_rejects_pending_id() {
        let gateway = gateway("https://spots.example.com/api/");
        assert!(matches!(
            gateway.item_url(EntityFamily::Spot, EntityId::Pending(1)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_id_makes_no_request() {
        // Nothing listens here; a request attempt would surface as Network.
        let gateway = gateway("http://127.0.0.1:9/");
        let result = gateway.delete(EntityFamily::Visit, EntityId::Pending(3)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_list_response_shapes() {
        let paged: ListResponse = serde_json::from_str(r#"{"items": [{"id": 1}], "total": 9}"#).unwrap();
        let page: RemotePage = paged.into();
        assert_eq!(page.total, Some(9));

        let bare: ListResponse = serde_json::from_str(r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        let page: RemotePage = bare.into();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, None);
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(mime_for("IMG_0001.JPG"), "image/jpeg");
        assert_eq!(mime_for("map.png"), "image/png");
        assert_eq!(mime_for("notes"), "application/octet-stream");
    }
}
