use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::VkConfig;
use crate::ingest::FetchError;

/// Thin VK HTTP API client. Every call carries the token and API version.
pub struct VkApi {
    client: Client,
    base_url: String,
    version: String,
    token: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolvedName {
    #[serde(rename = "type")]
    pub kind: String,
    pub object_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub screen_name: Option<String>,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Group {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub screen_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WallPage {
    #[serde(default)]
    pub items: Vec<Post>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: i64,
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentPage {
    #[serde(default)]
    pub items: Vec<WallComment>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WallComment {
    pub id: i64,
    #[serde(default)]
    pub from_id: i64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Unwraps a VK response envelope, turning `{"error": ...}` into `FetchError::Api`.
pub fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    if let Some(err) = envelope.error {
        return Err(FetchError::Api {
            code: err.error_code,
            message: err.error_msg,
        });
    }
    envelope
        .response
        .ok_or_else(|| FetchError::Parse("response missing from VK reply".into()))
}

impl VkApi {
    pub fn new(config: &VkConfig) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: config.api_base.clone(),
            version: config.api_version.clone(),
            token: config.access_token.clone(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, method);
        debug!("VK API call {}", method);

        let body = self
            .client
            .get(&url)
            .query(params)
            .query(&[("access_token", &self.token), ("v", &self.version)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_envelope(&body)
    }

    pub async fn resolve_screen_name(&self, screen_name: &str) -> Result<Option<ResolvedName>, FetchError> {
        // VK answers an unknown name with an empty array instead of an object
        let value: serde_json::Value = self
            .call("utils.resolveScreenName", &[("screen_name", screen_name.to_string())])
            .await?;
        if value.is_object() {
            serde_json::from_value(value)
                .map(Some)
                .map_err(|e| FetchError::Parse(e.to_string()))
        } else {
            Ok(None)
        }
    }

    pub async fn user(&self, user_id: i64) -> Result<Option<Profile>, FetchError> {
        let users: Vec<Profile> = self
            .call(
                "users.get",
                &[
                    ("user_ids", user_id.to_string()),
                    ("fields", "screen_name".to_string()),
                ],
            )
            .await?;
        Ok(users.into_iter().next())
    }

    pub async fn group(&self, group_id: i64) -> Result<Option<Group>, FetchError> {
        let groups: Vec<Group> = self
            .call("groups.getById", &[("group_id", group_id.abs().to_string())])
            .await?;
        Ok(groups.into_iter().next())
    }

    pub async fn wall_posts(&self, owner_id: i64, count: u32) -> Result<Vec<Post>, FetchError> {
        let page: WallPage = self
            .call(
                "wall.get",
                &[
                    ("owner_id", owner_id.to_string()),
                    ("count", count.to_string()),
                    ("filter", "owner".to_string()),
                ],
            )
            .await?;
        Ok(page.items)
    }

    pub async fn post_comments(
        &self,
        owner_id: i64,
        post_id: i64,
        count: u32,
    ) -> Result<CommentPage, FetchError> {
        self.call(
            "wall.getComments",
            &[
                ("owner_id", owner_id.to_string()),
                ("post_id", post_id.to_string()),
                ("count", count.to_string()),
                ("sort", "desc".to_string()),
                ("need_likes", "0".to_string()),
                ("extended", "1".to_string()),
            ],
        )
        .await
    }
}
