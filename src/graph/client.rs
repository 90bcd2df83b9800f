//! Authenticated HTTP calls to Microsoft Graph.

use std::path::Path;
use std::time::Duration;

use reqwest::{header, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use super::models::{Collection, DriveItem, SendMailRequest, UserProfile};
use crate::error::ApiError;

/// HTTP request timeout. Uploads send the whole file in one request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request payload.
#[derive(Debug)]
pub enum RequestBody {
    Json(Value),
    /// Raw bytes sent as `application/octet-stream`.
    Bytes(Vec<u8>),
}

/// Where an upload lands in the signed-in user's drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// Directly under the drive root.
    Root,
    /// Inside the folder with this drive item id.
    Item(String),
}

impl UploadTarget {
    /// Path of the `content` endpoint for `file_name` under this target.
    pub fn content_path(&self, file_name: &str) -> String {
        let name = urlencoding::encode(file_name);
        match self {
            UploadTarget::Root => format!("/me/drive/root:/{}:/content", name),
            UploadTarget::Item(item_id) => {
                format!("/me/drive/items/{}:/{}:/content", item_id, name)
            }
        }
    }
}

/// Content path for uploading the local file at `file` to `target`.
///
/// Only the base name of `file` ends up in the URL.
pub fn upload_path(file: &Path, target: &UploadTarget) -> Result<String, ApiError> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy())
        .ok_or_else(|| ApiError::NoFileName(file.to_path_buf()))?;
    Ok(target.content_path(&file_name))
}

/// Microsoft Graph API client.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new Graph client rooted at `base_url`
    /// (e.g. `https://graph.microsoft.com/v1.0`).
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            // 3xx responses are reported, not followed
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send one authenticated request and return the parsed JSON body.
    ///
    /// Any non-2xx status, redirects included, is returned as
    /// [`ApiError::Http`] with the raw body.
    /// A successful empty body (e.g. `202 Accepted` from `sendMail`) becomes
    /// `{"status": "Success"}`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        access_token: &str,
        body: Option<RequestBody>,
    ) -> Result<Value, ApiError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self
            .http_client
            .request(method, &url)
            .bearer_auth(access_token);

        request = match body {
            Some(RequestBody::Json(json)) => request.json(&json),
            Some(RequestBody::Bytes(bytes)) => request
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("Graph request failed: HTTP {} - {}", status, text);
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(serde_json::json!({ "status": "Success" }));
        }

        serde_json::from_str(&text).map_err(|e| ApiError::ParseFailed(e.to_string()))
    }

    async fn get_as<T: DeserializeOwned>(&self, path: &str, access_token: &str) -> Result<T, ApiError> {
        let value = self.request(Method::GET, path, access_token, None).await?;
        from_value(value)
    }

    /// Fetch the current user's profile.
    pub async fn get_user_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        self.get_as("/me", access_token).await
    }

    /// List the children of a drive root. Without `drive_id` this is the
    /// signed-in user's OneDrive.
    pub async fn list_drive_items(
        &self,
        access_token: &str,
        drive_id: Option<&str>,
    ) -> Result<Vec<DriveItem>, ApiError> {
        let path = match drive_id {
            Some(id) => format!("/drives/{}/root/children", id),
            None => "/me/drive/root/children".to_string(),
        };
        let page: Collection<DriveItem> = self.get_as(&path, access_token).await?;
        if page.next_link.is_some() {
            debug!("More drive items available; only the first page is returned");
        }
        Ok(page.value)
    }

    /// Upload a local file in a single PUT. Suitable for files up to 250 MB.
    pub async fn upload_file(
        &self,
        access_token: &str,
        file: &Path,
        target: &UploadTarget,
    ) -> Result<DriveItem, ApiError> {
        let path = upload_path(file, target)?;
        let content = tokio::fs::read(file)
            .await
            .map_err(|source| ApiError::ReadFile {
                path: file.to_path_buf(),
                source,
            })?;
        debug!("Uploading {} bytes from {:?}", content.len(), file);

        let value = self
            .request(Method::PUT, &path, access_token, Some(RequestBody::Bytes(content)))
            .await?;
        from_value(value)
    }

    /// Send a plain-text email from the signed-in user.
    pub async fn send_email(
        &self,
        access_token: &str,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<Value, ApiError> {
        let message = serde_json::to_value(SendMailRequest::text(recipient, subject, body))
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;
        self.request(
            Method::POST,
            "/me/sendMail",
            access_token,
            Some(RequestBody::Json(message)),
        )
        .await
    }

    /// List users in the directory. Needs `User.Read.All`, usually granted
    /// as an application permission.
    pub async fn list_users(&self, access_token: &str) -> Result<Vec<UserProfile>, ApiError> {
        let page: Collection<UserProfile> = self.get_as("/users", access_token).await?;
        Ok(page.value)
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::ParseFailed(e.to_string()))
}
