use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://dns.vrkids.ru";
pub const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

// Usernames land in a path segment; escape everything a raw segment
// cannot carry.
const USERNAME_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub init_data: String,
    pub user_id: Option<i64>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    init_data: String,
    user_id: Option<i64>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).with_context(|| format!("parse base url {base}"))?;
        let timeout = config.timeout.unwrap_or(Duration::from_secs(20));
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder().timeout(timeout).build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            init_data: config.init_data,
            user_id: config.user_id,
        })
    }

    pub fn me(&self) -> Result<User> {
        self.fetch_json(Method::GET, "/api/user/me", &self.auth_params())
            .context("fetch current user")
    }

    /// Looks up a user by username. A 404 is the expected "no such user"
    /// outcome and maps to `Ok(None)`.
    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.trim();
        if username.is_empty() {
            bail!("api: username is required");
        }
        let segment = utf8_percent_encode(username, USERNAME_SEGMENT);
        let path = format!("/api/user/username/{segment}");
        let mut url = self.base_url.join(&path)?;
        append_params(&mut url, &self.auth_params());

        let response = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()
            .with_context(|| format!("look up user {username}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response)?;
        let user: User = response.json().context("decode user lookup response")?;
        Ok(Some(user))
    }

    pub fn my_images(&self) -> Result<Vec<Image>> {
        self.fetch_json(Method::GET, "/api/images/my", &self.auth_params())
            .context("fetch my images")
    }

    pub fn feed(&self) -> Result<Vec<Image>> {
        self.fetch_json(Method::GET, "/api/images/feed", &self.auth_params())
            .context("fetch feed")
    }

    pub fn user_images(&self, telegram_id: i64) -> Result<Vec<Image>> {
        let path = format!("/api/images/user/{telegram_id}");
        self.fetch_json(Method::GET, &path, &self.auth_params())
            .context("fetch user images")
    }

    // The comment list read is unauthenticated, matching the image file
    // proxy.
    pub fn comments(&self, image_id: i64) -> Result<Vec<Comment>> {
        let path = format!("/api/images/{image_id}/comments");
        self.fetch_json(Method::GET, &path, &[])
            .context("fetch comments")
    }

    /// Address of the binary image proxy for one image. The bytes behind
    /// it are public; callers fetch them directly or hand the URL to a
    /// browser.
    pub fn image_url(&self, image_id: i64) -> Result<Url> {
        let path = format!("/api/images/{image_id}/file");
        self.base_url
            .join(&path)
            .with_context(|| format!("build image url for {image_id}"))
    }

    pub fn toggle_like(&self, image_id: i64) -> Result<LikeUpdate> {
        let body = json!({ "image_id": image_id });
        let resp = self.request(Method::POST, "/api/images/like", &[], Some(body))?;
        let update: LikeUpdate = resp.json().context("decode like response")?;
        Ok(update)
    }

    pub fn post_comment(&self, image_id: i64, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            bail!("api: comment text is required");
        }
        let body = json!({ "image_id": image_id, "text": text });
        // The response body carries nothing the client needs; the caller
        // re-fetches the comment list instead.
        self.request(Method::POST, "/api/images/comment", &[], Some(body))?;
        Ok(())
    }

    pub fn subscriptions(&self) -> Result<Vec<SubscribedUser>> {
        self.fetch_json(Method::GET, "/api/subscriptions", &self.auth_params())
            .context("fetch subscriptions")
    }

    pub fn toggle_subscription(&self, target_id: i64) -> Result<SubscriptionUpdate> {
        let body = json!({ "target_id": target_id });
        let resp = self.request(Method::POST, "/api/subscriptions/toggle", &[], Some(body))?;
        let update: SubscriptionUpdate = resp.json().context("decode subscription response")?;
        Ok(update)
    }

    pub fn search_history(&self) -> Result<Vec<String>> {
        self.fetch_json(Method::GET, "/api/search/history", &self.auth_params())
            .context("fetch search history")
    }

    fn auth_params(&self) -> Vec<(String, String)> {
        let user_id = self
            .user_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        vec![
            ("initData".to_string(), self.init_data.clone()),
            ("user_id".to_string(), user_id),
        ]
    }

    fn fetch_json<T>(&self, method: Method, path: &str, params: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(method, path, params, None)?;
        let value: T = resp.json()?;
        Ok(value)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Response> {
        let mut url = self.base_url.join(path)?;
        append_params(&mut url, params);

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(json_body) = body {
            req = req.header(INIT_DATA_HEADER, self.init_data.clone());
            req = req.json(&json_body);
        }

        let resp = req.send()?;
        check_status(resp)
    }
}

fn append_params(url: &mut Url, params: &[(String, String)]) {
    if params.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (k, v) in params {
        pairs.append_pair(k, v);
    }
}

fn check_status(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    match status.as_u16() {
        401 => Err(anyhow!("api: unauthorized")),
        403 => Err(anyhow!("api: forbidden")),
        404 => Err(anyhow!("api: not found")),
        _ => Err(anyhow!("api: error {}: {}", status, body)),
    }
}

fn handle_of(username: Option<&str>) -> String {
    match username {
        Some(name) if !name.trim().is_empty() => format!("@{name}"),
        _ => "@без username".to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub telegram_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        let full = format!("{first} {last}");
        let trimmed = full.trim();
        if trimmed.is_empty() {
            "Без имени".to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn handle(&self) -> String {
        handle_of(self.username.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub is_liked: bool,
}

impl Image {
    pub fn has_file(&self) -> bool {
        self.file_path
            .as_deref()
            .map(|path| !path.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl Comment {
    pub fn author_label(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                self.username
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
            })
            .unwrap_or("Пользователь")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribedUser {
    #[serde(default)]
    pub telegram_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl SubscribedUser {
    pub fn full_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        format!("{first} {last}").trim().to_string()
    }

    pub fn handle(&self) -> String {
        handle_of(self.username.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LikeUpdate {
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub is_liked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub is_subscribed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(user_id: Option<i64>) -> Client {
        Client::new(ClientConfig {
            user_agent: "fotolenta-test/0.1".into(),
            base_url: Some("https://photos.test".into()),
            init_data: "signed payload".into(),
            user_id,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn rejects_empty_user_agent() {
        let result = Client::new(ClientConfig {
            user_agent: "   ".into(),
            ..ClientConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn auth_params_encode_known_user() {
        let client = client_with(Some(99));
        let params = client.auth_params();
        assert_eq!(params[0], ("initData".to_string(), "signed payload".to_string()));
        assert_eq!(params[1], ("user_id".to_string(), "99".to_string()));
    }

    #[test]
    fn auth_params_send_empty_user_id_when_unknown() {
        let client = client_with(None);
        let params = client.auth_params();
        assert_eq!(params[1], ("user_id".to_string(), String::new()));
    }

    #[test]
    fn image_url_points_at_file_proxy() {
        let client = client_with(Some(1));
        let url = client.image_url(42).unwrap();
        assert_eq!(url.as_str(), "https://photos.test/api/images/42/file");
    }

    #[test]
    fn username_segment_is_escaped() {
        let encoded = utf8_percent_encode("два слова/..", USERNAME_SEGMENT).to_string();
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains(' '));
    }

    #[test]
    fn comment_author_falls_back() {
        let comment = Comment {
            first_name: Some(String::new()),
            username: Some("ivan".into()),
            text: "привет".into(),
        };
        assert_eq!(comment.author_label(), "ivan");

        let anonymous = Comment {
            first_name: None,
            username: None,
            text: "привет".into(),
        };
        assert_eq!(anonymous.author_label(), "Пользователь");
    }

    #[test]
    fn profile_labels_use_fallbacks() {
        let user = User {
            id: 1,
            telegram_id: 10,
            username: None,
            first_name: None,
            last_name: None,
        };
        assert_eq!(user.display_name(), "Без имени");
        assert_eq!(user.handle(), "@без username");

        let named = User {
            id: 2,
            telegram_id: 20,
            username: Some("anna".into()),
            first_name: Some("Анна".into()),
            last_name: Some("Иванова".into()),
        };
        assert_eq!(named.display_name(), "Анна Иванова");
        assert_eq!(named.handle(), "@anna");
    }
}
