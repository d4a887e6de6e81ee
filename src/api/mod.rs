pub mod menu;
pub mod recurrence;
pub mod todo;

use crate::models::Session;
use crate::storage::{clear_session, load_session, save_session};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use menu::MenuGateway;
pub use recurrence::RecurrenceGateway;
pub use todo::{MoveTarget, NewTodo, TodoGateway, TodoPatch};

/// Returned whenever a call needs a session and none is present.
pub const AUTH_REQUIRED: &str = "인증이 필요합니다";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    /// Rejected locally, nothing was sent.
    Validation,
    Network,
    Http,
    Parse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn network(e: reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            message: e.to_string(),
        }
    }

    pub fn parse(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            message: e.to_string(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            message: AUTH_REQUIRED.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Validation,
            message: message.into(),
        }
    }

    fn http(status: reqwest::StatusCode, body: String, ctx: &str) -> Self {
        // PostgREST and edge functions put the useful part in `message` / `error`.
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body);
        Self {
            kind: ApiErrorKind::Http,
            message: format!("{ctx} ({status}): {detail}"),
        }
    }
}

pub type ServiceResult<T> = Result<T, ApiError>;

/// Trims `value` and rejects it if nothing is left.
pub fn require_text(field: &str, value: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

const DEFAULT_SUPABASE_URL: &str = "http://localhost:54321";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnvConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Reads `window.ENV` in the browser; defaults elsewhere.
    pub fn new() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            let env = web_sys::window()
                .and_then(|w| w.get("ENV"))
                .filter(|env| !env.is_undefined() && env.is_object());
            Self::from_lookup(|key| {
                env.as_ref()
                    .and_then(|env| js_sys::Reflect::get(env, &key.into()).ok())
                    .and_then(|v| v.as_string())
            })
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            Self::from_lookup(|_| None)
        }
    }

    /// Each setting may be spelled `SUPABASE_URL` or `supabase_url`; the
    /// upper-case spelling wins.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |upper: &str| {
            lookup(upper)
                .or_else(|| lookup(&upper.to_ascii_lowercase()))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            supabase_url: get("SUPABASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_SUPABASE_URL.to_string()),
            supabase_anon_key: get("SUPABASE_ANON_KEY").unwrap_or_default(),
            log_level: get("LOG_LEVEL"),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// PostgREST filter pair, e.g. `("id", "eq.5")`.
pub type Filter = (&'static str, String);

pub fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[derive(Deserialize)]
struct FunctionEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    pub base_url: String,
    pub anon_key: String,
    pub session: Option<Session>,
}

impl ApiClient {
    pub fn new(config: &EnvConfig) -> Self {
        Self {
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
            session: None,
        }
    }

    pub fn load_from_storage(config: &EnvConfig) -> Self {
        let mut client = Self::new(config);
        client.session = load_session();
        client
    }

    pub fn save_to_storage(&self) {
        if let Some(session) = &self.session {
            save_session(session);
        }
    }

    pub fn clear_storage() {
        clear_session();
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn logout(&mut self) {
        self.session = None;
        Self::clear_storage();
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn require_session(&self) -> ServiceResult<&Session> {
        self.session.as_ref().ok_or_else(ApiError::unauthorized)
    }

    pub fn user_id(&self) -> ServiceResult<&str> {
        self.require_session().map(|s| s.user_id.as_str())
    }

    pub fn rest_url(&self, table: &str, filters: &[Filter]) -> String {
        let mut url = format!("{}/rest/v1/{}", self.base_url, table);
        if !filters.is_empty() {
            let query = filters
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    fn with_auth_headers(
        &self,
        req: reqwest::RequestBuilder,
    ) -> ServiceResult<reqwest::RequestBuilder> {
        let session = self.require_session()?;
        Ok(req
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token)))
    }

    fn rest(
        &self,
        method: reqwest::Method,
        table: &str,
        filters: &[Filter],
    ) -> ServiceResult<reqwest::RequestBuilder> {
        let client = reqwest::Client::new();
        self.with_auth_headers(client.request(method, self.rest_url(table, filters)))
    }

    /// Single-row responses come back as an object instead of an array.
    fn single(req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Accept", "application/vnd.pgrst.object+json")
    }

    fn returning(req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Prefer", "return=representation")
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        ctx: &str,
    ) -> ServiceResult<T> {
        let res = Self::check(req, ctx).await?;
        res.json().await.map_err(ApiError::parse)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder, ctx: &str) -> ServiceResult<()> {
        Self::check(req, ctx).await.map(|_| ())
    }

    async fn check(req: reqwest::RequestBuilder, ctx: &str) -> ServiceResult<reqwest::Response> {
        let res = req.send().await.map_err(ApiError::network)?;

        if res.status().is_success() {
            Ok(res)
        } else if res.status().as_u16() == 401 {
            Err(ApiError::unauthorized())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::http(status, body, ctx))
        }
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> ServiceResult<Vec<T>> {
        let req = self.rest(reqwest::Method::GET, table, filters)?;
        self.send(req, &format!("select {table}")).await
    }

    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> ServiceResult<T> {
        let req = Self::single(self.rest(reqwest::Method::GET, table, filters)?);
        self.send(req, &format!("select {table}")).await
    }

    /// Like `select_one` but a missing row is `None` rather than an error.
    pub async fn select_maybe<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> ServiceResult<Option<T>> {
        let mut rows: Vec<T> = self.select(table, filters).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    pub async fn insert_one<T: DeserializeOwned>(
        &self,
        table: &str,
        body: &impl Serialize,
    ) -> ServiceResult<T> {
        let req = Self::single(Self::returning(self.rest(
            reqwest::Method::POST,
            table,
            &[("select", "*".to_string())],
        )?))
        .json(body);
        self.send(req, &format!("insert {table}")).await
    }

    pub async fn update_one<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
        body: &impl Serialize,
    ) -> ServiceResult<T> {
        let req = Self::single(Self::returning(self.rest(
            reqwest::Method::PATCH,
            table,
            filters,
        )?))
        .json(body);
        self.send(req, &format!("update {table}")).await
    }

    pub async fn update_many<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
        body: &impl Serialize,
    ) -> ServiceResult<Vec<T>> {
        let req = Self::returning(self.rest(reqwest::Method::PATCH, table, filters)?).json(body);
        self.send(req, &format!("update {table}")).await
    }

    pub async fn delete(&self, table: &str, filters: &[Filter]) -> ServiceResult<()> {
        let req = self.rest(reqwest::Method::DELETE, table, filters)?;
        self.send_empty(req, &format!("delete {table}")).await
    }

    fn rpc_request(
        &self,
        name: &str,
        params: &impl Serialize,
    ) -> ServiceResult<reqwest::RequestBuilder> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, name);
        let client = reqwest::Client::new();
        Ok(self.with_auth_headers(client.post(url))?.json(params))
    }

    pub async fn rpc<T: DeserializeOwned>(
        &self,
        name: &str,
        params: &impl Serialize,
    ) -> ServiceResult<T> {
        let req = self.rpc_request(name, params)?;
        self.send(req, &format!("rpc {name}")).await
    }

    pub async fn rpc_void(&self, name: &str, params: &impl Serialize) -> ServiceResult<()> {
        let req = self.rpc_request(name, params)?;
        self.send_empty(req, &format!("rpc {name}")).await
    }

    /// Calls an edge function that answers `{ success, data }` or `{ error }`.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        function: &str,
        body: &impl Serialize,
    ) -> ServiceResult<T> {
        let url = format!("{}/functions/v1/{}", self.base_url, function);
        let client = reqwest::Client::new();
        let req = self.with_auth_headers(client.post(url))?.json(body);
        let envelope: FunctionEnvelope<T> = self.send(req, function).await?;
        match envelope {
            FunctionEnvelope {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            FunctionEnvelope { error, .. } => Err(ApiError {
                kind: ApiErrorKind::Http,
                message: error.unwrap_or_else(|| format!("{function} returned no data")),
            }),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn offline() -> ApiError {
        ApiError {
            kind: ApiErrorKind::Network,
            message: "offline".to_string(),
        }
    }

    pub fn test_client() -> ApiClient {
        let config = EnvConfig::from_lookup(|key| match key {
            "SUPABASE_URL" => Some("https://demo.supabase.co/".to_string()),
            "supabase_anon_key" => Some("anon".to_string()),
            _ => None,
        });
        let mut client = ApiClient::new(&config);
        client.set_session(Session {
            access_token: "jwt".to_string(),
            user_id: "user-1".to_string(),
        });
        client
    }

    #[test]
    fn test_config_lookup_prefers_upper_case() {
        let config = EnvConfig::from_lookup(|key| match key {
            "SUPABASE_URL" => Some("https://a.supabase.co".to_string()),
            "supabase_url" => Some("https://b.supabase.co".to_string()),
            "log_level" => Some("info".to_string()),
            _ => None,
        });
        assert_eq!(config.supabase_url, "https://a.supabase.co");
        assert_eq!(config.supabase_anon_key, "");
        assert_eq!(config.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_config_defaults() {
        let config = EnvConfig::from_lookup(|key| match key {
            "SUPABASE_URL" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.supabase_url, DEFAULT_SUPABASE_URL);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_require_text() {
        assert_eq!(require_text("name", "  Work "), Ok("Work".to_string()));
        let err = require_text("name", "   ").unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);
    }

    #[test]
    fn test_missing_session_fails_fast() {
        let mut client = test_client();
        client.session = None;
        let err = client.user_id().unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Unauthorized);
        assert_eq!(err.to_string(), AUTH_REQUIRED);
        assert!(client.rest(reqwest::Method::GET, "lists", &[]).is_err());
    }

    #[test]
    fn test_rest_request_shape() {
        let client = test_client();
        let req = ApiClient::single(
            client
                .rest(
                    reqwest::Method::GET,
                    "lists",
                    &[("id", eq(5)), ("select", "id,name,color".to_string())],
                )
                .unwrap(),
        )
        .build()
        .unwrap();

        assert_eq!(
            req.url().as_str(),
            "https://demo.supabase.co/rest/v1/lists?id=eq.5&select=id%2Cname%2Ccolor"
        );
        assert_eq!(req.headers()["apikey"], "anon");
        assert_eq!(req.headers()["Authorization"], "Bearer jwt");
        assert_eq!(req.headers()["Accept"], "application/vnd.pgrst.object+json");
    }

    #[test]
    fn test_http_error_extracts_message() {
        let err = ApiError::http(
            reqwest::StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key value"}"#.to_string(),
            "insert lists",
        );
        assert_eq!(err.kind, ApiErrorKind::Http);
        assert_eq!(err.message, "insert lists (409 Conflict): duplicate key value");

        let raw = ApiError::http(
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream down".to_string(),
            "rpc x",
        );
        assert!(raw.message.ends_with("upstream down"));
    }

    #[test]
    fn test_function_envelope_shapes() {
        let ok: FunctionEnvelope<i64> =
            serde_json::from_str(r#"{"success": true, "data": 3}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.data, Some(3));

        let err: FunctionEnvelope<i64> =
            serde_json::from_str(r#"{"error": "Item not found or unauthorized"}"#).unwrap();
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("Item not found or unauthorized"));
    }
}
