use async_trait::async_trait;
use log::{debug, info};
use reqwest::{
    multipart::{Form, Part},
    Client, Response, Url,
};
use serde::Deserialize;

use super::{ContentError, ContentPointer, ContentStore, FileInfo};

/// Pinata v3 files API.
pub struct PinataClient {
    http: Client,
    jwt: Option<String>,
    upload_url: String,
    api_url: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}
#[derive(Deserialize)]
struct RawFile {
    id: String,
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Enough of the credential to tell tokens apart in logs.
fn redact(token: &str) -> String {
    format!("{}...", token.chars().take(10).collect::<String>())
}

impl PinataClient {
    pub fn new(jwt: Option<String>, upload_url: &str, api_url: &str) -> Self {
        Self {
            http: Client::new(),
            jwt,
            upload_url: upload_url.trim_end_matches('/').to_owned(),
            api_url: api_url.trim_end_matches('/').to_owned(),
        }
    }

    fn token(&self) -> Result<&str, ContentError> {
        self.jwt
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ContentError::MissingCredential)
    }

    /// `{api_url}/files/public/{pointer}`, with the pointer kept to a single path segment.
    fn file_url(&self, pointer: &ContentPointer) -> Result<Url, ContentError> {
        let bad_endpoint = || ContentError::Endpoint(self.api_url.clone());

        let mut url = Url::parse(&self.api_url).map_err(|_| bad_endpoint())?;
        url.path_segments_mut()
            .map_err(|_| bad_endpoint())?
            .pop_if_empty()
            .extend(["files", "public", pointer.as_str()]);

        Ok(url)
    }

    async fn read(res: Response) -> Result<RawFile, ContentError> {
        let status = res.status();
        let body = res.text().await.map_err(ContentError::Http)?;

        if !status.is_success() {
            return Err(ContentError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let raw: Envelope<RawFile> = serde_json::from_str(&body).map_err(ContentError::Scheme)?;
        raw.data.ok_or(ContentError::MissingCid)
    }
}

#[async_trait]
impl ContentStore for PinataClient {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<ContentPointer, ContentError> {
        let token = self.token()?;
        let stamp = chrono::Utc::now().timestamp_millis();

        let form = Form::new()
            .text("network", "public")
            .part("file", Part::bytes(bytes.to_vec()).file_name(name.to_owned()))
            .text("name", format!("drippy-{name}-{stamp}"));

        info!(
            "Uploading {name} ({} bytes) as public with {}",
            bytes.len(),
            redact(token)
        );
        let res = self
            .http
            .post(format!("{}/files", self.upload_url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(ContentError::Http)?;

        let file = Self::read(res).await?;
        info!("Uploaded {name} as file {}", file.id);

        Ok(ContentPointer::new(file.id))
    }

    async fn file_info(&self, pointer: &ContentPointer) -> Result<FileInfo, ContentError> {
        let token = self.token()?;

        debug!("Fetching file info for {pointer}");
        let res = self
            .http
            .get(self.file_url(pointer)?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(ContentError::Http)?;

        let file = Self::read(res).await?;
        let cid = file
            .cid
            .filter(|c| !c.is_empty())
            .ok_or(ContentError::MissingCid)?;

        Ok(FileInfo {
            id: file.id,
            cid,
            name: file.name,
        })
    }
}
