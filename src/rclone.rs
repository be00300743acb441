//! Backend R: the rclone remote-control API.
//!
//! Every call is a JSON `POST` to `<base>/<endpoint>`; failures come back with a non-2xx
//! status and an `{"error": "..."}` body. Uploads are the one multipart call.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{
    multipart::{Form, Part},
    Body, RequestBuilder, Response,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{path::Path, sync::Arc};
use tokio_util::io::ReaderStream;
use url::Url;

use crate::{
    config::{parse_endpoint, RcloneEndpoint},
    error::{CoreError, Result},
};

/// Called with `(bytes_sent, bytes_total)` while an upload streams.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait RcloneApi: Send + Sync {
    async fn post(&self, endpoint: &str, body: Value) -> Result<Value>;

    async fn upload_file(
        &self,
        fs: &str,
        remote: &str,
        local_path: &Path,
        on_progress: ProgressFn,
    ) -> Result<Value>;
}

pub struct RcloneClient {
    http: reqwest::Client,
    base: Url,
    user: String,
    pass: String,
}

impl RcloneClient {
    pub fn new(endpoint: &RcloneEndpoint) -> Result<Self> {
        let mut base = parse_endpoint(&endpoint.url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            user: endpoint.user.clone(),
            pass: endpoint.pass.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        self.base
            .join(endpoint.trim_start_matches('/'))
            .map_err(|err| CoreError::Config(format!("Invalid rclone endpoint {endpoint}: {err}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.user.is_empty() && self.pass.is_empty() {
            request
        } else {
            request.basic_auth(&self.user, Some(&self.pass))
        }
    }
}

#[async_trait]
impl RcloneApi for RcloneClient {
    async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        tracing::debug!(endpoint, "rclone request");
        let response = self
            .authorize(self.http.post(self.url(endpoint)?).json(&body))
            .send()
            .await?;
        read_response(endpoint, response).await
    }

    async fn upload_file(
        &self,
        fs: &str,
        remote: &str,
        local_path: &Path,
        on_progress: ProgressFn,
    ) -> Result<Value> {
        const ENDPOINT: &str = "operations/uploadfile";

        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                CoreError::InvalidOperation(format!(
                    "Upload source has no file name: {}",
                    local_path.display()
                ))
            })?
            .to_string();

        let file = tokio::fs::File::open(local_path).await?;
        let total = file.metadata().await?.len();

        let mut sent = 0u64;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                on_progress(sent, total);
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total).file_name(file_name);
        let form = Form::new().part("file0", part);

        tracing::debug!(fs, remote, bytes = total, "rclone upload");
        let response = self
            .authorize(
                self.http
                    .post(self.url(ENDPOINT)?)
                    .query(&[("fs", fs), ("remote", remote)])
                    .multipart(form),
            )
            .send()
            .await?;
        read_response(ENDPOINT, response).await
    }
}

async fn read_response(endpoint: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let raw = response.text().await?;
    let body = if raw.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw))
    };

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(CoreError::backend(endpoint, message));
    }
    Ok(body)
}

/// One row of `operations/list`.
#[derive(Clone, Debug, Deserialize)]
pub struct RcloneListItem {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "MimeType", default)]
    pub mime_type: String,
    #[serde(rename = "ModTime", default)]
    pub mod_time: String,
    #[serde(rename = "IsDir", default)]
    pub is_dir: bool,
}

#[derive(Debug, Deserialize)]
pub struct RcloneListResponse {
    #[serde(default)]
    pub list: Vec<RcloneListItem>,
}

/// One row of `mount/listmounts`.
#[derive(Clone, Debug, Deserialize)]
pub struct RcloneMountPoint {
    #[serde(rename = "Fs")]
    pub fs: String,
    #[serde(rename = "MountPoint")]
    pub mount_point: String,
    #[serde(rename = "MountedOn", default)]
    pub mounted_on: String,
}

#[derive(Debug, Deserialize)]
pub struct RcloneMountList {
    #[serde(rename = "mountPoints", default)]
    pub mount_points: Option<Vec<RcloneMountPoint>>,
}
