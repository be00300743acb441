//! Backend M: the openlist storage manager admin API.

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{
    config::{parse_endpoint, OpenlistEndpoint},
    error::{CoreError, Result},
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenlistStorage {
    pub id: i64,
    pub mount_path: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub addition: String,
}

#[async_trait]
pub trait OpenlistApi: Send + Sync {
    async fn list_storages(&self) -> Result<Vec<OpenlistStorage>>;
    async fn get_storage(&self, id: i64) -> Result<OpenlistStorage>;
    async fn delete_storage(&self, id: i64) -> Result<()>;
}

pub struct OpenlistClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: Option<i64>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct StoragePage {
    #[serde(default)]
    content: Option<Vec<OpenlistStorage>>,
}

impl OpenlistClient {
    pub fn new(endpoint: &OpenlistEndpoint) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: parse_endpoint(&endpoint.url)?,
            token: endpoint.token.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| CoreError::Config(format!("Invalid openlist path {path}: {err}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(self.url(path)?)
            .header(AUTHORIZATION, &self.token)
            .query(query)
            .send()
            .await?;
        unwrap_envelope(path, response).await
    }

    async fn post(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .http
            .post(self.url(path)?)
            .header(AUTHORIZATION, &self.token)
            .query(query)
            .send()
            .await?;
        unwrap_envelope(path, response).await
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(path: &str, response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(CoreError::backend(path, format!("HTTP {status}")));
    }

    let envelope: Envelope = response.json().await?;
    match envelope.code {
        Some(200) | None => Ok(serde_json::from_value(envelope.data)?),
        Some(code) => Err(CoreError::backend(
            path,
            format!("code={code}, message={}", envelope.message),
        )),
    }
}

#[async_trait]
impl OpenlistApi for OpenlistClient {
    async fn list_storages(&self) -> Result<Vec<OpenlistStorage>> {
        let page: StoragePage = self.get("/api/admin/storage/list", &[]).await?;
        Ok(page.content.unwrap_or_default())
    }

    async fn get_storage(&self, id: i64) -> Result<OpenlistStorage> {
        self.get("/api/admin/storage/get", &[("id", id.to_string())])
            .await
    }

    async fn delete_storage(&self, id: i64) -> Result<()> {
        self.post("/api/admin/storage/delete", &[("id", id.to_string())])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_page_tolerates_null_content() {
        let page: StoragePage = serde_json::from_str(r#"{"content": null, "total": 0}"#).unwrap();
        assert!(page.content.is_none());

        let page: StoragePage = serde_json::from_str(
            r#"{"content": [{"id": 3, "mount_path": "/gdrive", "driver": "GoogleDrive", "status": "work"}]}"#,
        )
        .unwrap();
        let storage = &page.content.unwrap()[0];
        assert_eq!(storage.mount_path, "/gdrive");
        assert!(!storage.disabled);
    }
}
