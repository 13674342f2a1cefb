// ABOUTME: Image endpoints: list, inspect, pull, push, and remove.
// ABOUTME: Pull and push report progress as JSON documents on a subscription.

use super::models::{ImageDeleteItem, ImageInspect, ImageSummary};
use super::sealed::Sealed;
use super::{ApiResult, decode, streaming, subscribe};
use crate::client::{AsyncHandle, Client, Command, Filters, Query};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::Serialize;

const LIST_KEYS: &[&str] = &["all", "filters", "digests"];
const PULL_KEYS: &[&str] = &["fromImage", "tag", "platform"];
const PUSH_KEYS: &[&str] = &["tag"];
const REMOVE_KEYS: &[&str] = &["force", "noprune"];

const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Image management operations.
#[async_trait]
pub trait ImageOps: Sealed + Send + Sync {
    async fn list_images(&self, opts: &ListImagesOptions) -> ApiResult<Vec<ImageSummary>>;

    async fn inspect_image(&self, name: &str) -> ApiResult<ImageInspect>;

    /// Start pulling `image`; progress arrives on the subscription.
    async fn pull_image(
        &self,
        image: &str,
        tag: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> ApiResult<AsyncHandle>;

    async fn push_image(
        &self,
        image: &str,
        tag: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> ApiResult<AsyncHandle>;

    async fn remove_image(
        &self,
        name: &str,
        force: bool,
        noprune: bool,
    ) -> ApiResult<Vec<ImageDeleteItem>>;
}

#[derive(Debug, Clone, Default)]
pub struct ListImagesOptions {
    /// Include intermediate images.
    pub all: bool,
    pub filters: Filters,
}

/// Registry credentials sent with pull and push.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serveraddress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identitytoken: Option<String>,
}

impl RegistryAuth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Base64url-encoded JSON, the form the engine expects in the header.
    pub fn header_value(&self) -> String {
        // Plain strings and options always serialize.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE.encode(json)
    }
}

fn auth_header(auth: Option<&RegistryAuth>) -> String {
    match auth {
        Some(auth) => auth.header_value(),
        None => RegistryAuth::default().header_value(),
    }
}

#[async_trait]
impl ImageOps for Client {
    async fn list_images(&self, opts: &ListImagesOptions) -> ApiResult<Vec<ImageSummary>> {
        let query = Query::new().flag("all", opts.all).filters(&opts.filters);
        let response = self
            .request(Command::get("/images/json").query(&query, LIST_KEYS))
            .await?;
        decode(&response, "image list")
    }

    async fn inspect_image(&self, name: &str) -> ApiResult<ImageInspect> {
        let response = self
            .request(Command::get(format!("/images/{name}/json")))
            .await?;
        decode(&response, "image inspect")
    }

    async fn pull_image(
        &self,
        image: &str,
        tag: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> ApiResult<AsyncHandle> {
        let query = Query::new().text("fromImage", image).text_opt("tag", tag);
        let config = streaming(None)
            .header(REGISTRY_AUTH_HEADER, &auth_header(auth))
            .build()?;
        let command = Command::post("/images/create")
            .query(&query, PULL_KEYS)
            .config(config);
        subscribe(self, command).await
    }

    async fn push_image(
        &self,
        image: &str,
        tag: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> ApiResult<AsyncHandle> {
        let query = Query::new().text_opt("tag", tag);
        let config = streaming(None)
            .header(REGISTRY_AUTH_HEADER, &auth_header(auth))
            .build()?;
        let command = Command::post(format!("/images/{image}/push"))
            .query(&query, PUSH_KEYS)
            .config(config);
        subscribe(self, command).await
    }

    async fn remove_image(
        &self,
        name: &str,
        force: bool,
        noprune: bool,
    ) -> ApiResult<Vec<ImageDeleteItem>> {
        let query = Query::new().flag("force", force).flag("noprune", noprune);
        let response = self
            .request(Command::delete(format!("/images/{name}")).query(&query, REMOVE_KEYS))
            .await?;
        decode(&response, "image remove")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_header_is_base64url_json() {
        let value = RegistryAuth::basic("ci", "s3cret").header_value();
        let decoded = URL_SAFE.decode(value).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(json, serde_json::json!({"username": "ci", "password": "s3cret"}));
    }

    #[test]
    fn anonymous_auth_is_empty_object() {
        let decoded = URL_SAFE.decode(auth_header(None)).unwrap();
        assert_eq!(decoded, b"{}");
    }
}
