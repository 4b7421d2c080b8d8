use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

pub const GET_ADMIN_CONFIG: &str = "GET_ADMIN_CONFIG";
pub const UPDATE_ADMIN_CONFIG: &str = "UPDATE_ADMIN_CONFIG";

/// Parameters that map 1:1 between the JSON payload and the form fields.
pub const BASIC_PARAMS: [&str; 14] = [
    "developerKey",
    "clientId",
    "defaultTag",
    "linkBackText",
    "moderationMode",
    "newSubmissionAddress",
    "brandingMode",
    "loginInstruction",
    "postSubmitMessage",
    "fromAddress",
    "approvalEmailText",
    "rejectionEmailText",
    "privateKeyBytes",
    "maxPhotoSizeMb",
];

const MESSAGE_SECS: i64 = 15;
const ERROR_SECS: i64 = 10;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("rpc endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid rpc endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Transport(#[from] RpcError),
    #[error("Request failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Remote(String),
    #[error("unknown configuration field {0}")]
    UnknownField(String),
}

/// Carries one JSON-RPC command and hands back the raw response body.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<String, RpcError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
pub struct RpcEnvelope {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl RpcEnvelope {
    pub fn into_result(self) -> Result<Value, AdminError> {
        match self.error {
            Some(error) if is_truthy(&error) => Err(AdminError::Remote(display_value(&error))),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// POSTs commands to the application's `/jsonrpc` endpoint.
pub struct HttpRpcTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRpcTransport {
    pub fn new(endpoint: &str, namespace: Option<&str>, timeout: Duration) -> Result<Self, RpcError> {
        let mut endpoint = Url::parse(endpoint)?;
        if let Some(ns) = namespace {
            endpoint.query_pairs_mut().append_pair("ns", ns);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn call(&self, method: &str, params: Value) -> Result<String, RpcError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&RpcRequest { method, params })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Status(status));
        }
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Message,
    Error,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hidden: bool,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            MessageLevel::Message => "message",
            MessageLevel::Error => "error",
        };
        write!(f, "[{}] {tag}: {}", format_date(&self.created_at), self.text)
    }
}

/// Status messages shown above the admin form.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    /// Records a message, hiding `replaces` if given. Returns the new id.
    pub fn show_message(&mut self, text: &str, replaces: Option<usize>) -> usize {
        self.push(MessageLevel::Message, text, replaces, MESSAGE_SECS)
    }

    pub fn show_error(&mut self, text: &str, replaces: Option<usize>) -> usize {
        self.push(MessageLevel::Error, text, replaces, ERROR_SECS)
    }

    fn push(
        &mut self,
        level: MessageLevel,
        text: &str,
        replaces: Option<usize>,
        display_secs: i64,
    ) -> usize {
        if let Some(old) = replaces.and_then(|id| self.messages.get_mut(id)) {
            old.hidden = true;
        }
        let id = self.messages.len();
        let created_at = Utc::now();
        self.messages.push(Message {
            level,
            text: text.to_string(),
            created_at,
            expires_at: created_at + TimeDelta::seconds(display_secs),
            hidden: false,
        });
        id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages still on screen at `now`, newest first.
    #[allow(dead_code)]
    pub fn visible_at(&self, now: DateTime<Utc>) -> Vec<&Message> {
        self.messages
            .iter()
            .rev()
            .filter(|m| !m.hidden && now < m.expires_at)
            .collect()
    }
}

/// The settings form as loaded from, and saved to, the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigForm {
    pub values: BTreeMap<String, String>,
    pub moderation_email: bool,
    pub photo_submission_enabled: bool,
    pub moderation_email_text_visible: bool,
    pub max_photo_size_visible: bool,
    pub authenticated_as: Option<String>,
}

impl ConfigForm {
    pub fn from_result(result: &Value) -> Self {
        let values = BASIC_PARAMS
            .iter()
            .map(|param| {
                let value = result.get(*param).map(field_value).unwrap_or_default();
                (param.to_string(), value)
            })
            .collect();
        let moderation_email = result.get("moderationEmail").is_some_and(is_truthy);
        let photo_submission_enabled = result.get("photoSubmissionEnabled").is_some_and(is_truthy);
        let authenticated_as = match (result.get("youTubeAuthSubToken"), result.get("youTubeUsername")) {
            (Some(token), Some(user)) if is_truthy(token) && is_truthy(user) => {
                Some(display_value(user))
            }
            _ => None,
        };
        Self {
            values,
            moderation_email,
            photo_submission_enabled,
            moderation_email_text_visible: moderation_email,
            max_photo_size_visible: photo_submission_enabled,
            authenticated_as,
        }
    }

    #[allow(dead_code)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Sets a basic parameter or one of the two checkboxes (`true`/`false`).
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), AdminError> {
        match name {
            "moderationEmail" => {
                if parse_checkbox(value) != self.moderation_email {
                    self.toggle_moderation_email();
                }
            }
            "photoSubmissionEnabled" => {
                if parse_checkbox(value) != self.photo_submission_enabled {
                    self.toggle_photo_submission();
                }
            }
            _ if BASIC_PARAMS.contains(&name) => {
                self.values.insert(name.to_string(), value.to_string());
            }
            _ => return Err(AdminError::UnknownField(name.to_string())),
        }
        Ok(())
    }

    pub fn toggle_moderation_email(&mut self) {
        self.moderation_email = !self.moderation_email;
        self.moderation_email_text_visible = !self.moderation_email_text_visible;
    }

    pub fn toggle_photo_submission(&mut self) {
        self.photo_submission_enabled = !self.photo_submission_enabled;
        self.max_photo_size_visible = !self.max_photo_size_visible;
    }

    pub fn authenticate_label(&self) -> &'static str {
        if self.authenticated_as.is_some() {
            "Re-Authenticate"
        } else {
            "Authenticate"
        }
    }

    pub fn to_params(&self) -> Value {
        let mut params: Map<String, Value> = BASIC_PARAMS
            .iter()
            .map(|param| {
                let value = self.values.get(*param).cloned().unwrap_or_default();
                (param.to_string(), Value::String(value))
            })
            .collect();
        params.insert("moderationEmail".into(), Value::Bool(self.moderation_email));
        params.insert(
            "photoSubmissionEnabled".into(),
            Value::Bool(self.photo_submission_enabled),
        );
        Value::Object(params)
    }
}

/// Drives the configuration tab: load, edit, save, with status messages.
pub struct AdminPanel<T: RpcTransport> {
    transport: T,
    log: MessageLog,
}

impl<T: RpcTransport> AdminPanel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            log: MessageLog::default(),
        }
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AdminError> {
        let raw = self.transport.call(method, params).await?;
        let envelope: RpcEnvelope = serde_json::from_str(&raw)?;
        envelope.into_result()
    }

    pub async fn get_admin_config(&mut self) -> Result<ConfigForm, AdminError> {
        let loading = self.log.show_message("Loading configuration...", None);
        match self.call(GET_ADMIN_CONFIG, json!({})).await {
            Ok(result) => {
                self.log.show_message("Configuration loaded.", Some(loading));
                info!("admin configuration loaded");
                Ok(ConfigForm::from_result(&result))
            }
            Err(err) => {
                warn!(%err, "loading admin configuration failed");
                self.log.show_error(&err.to_string(), Some(loading));
                Err(err)
            }
        }
    }

    pub async fn update_admin_config(&mut self, form: &ConfigForm) -> Result<(), AdminError> {
        let saving = self.log.show_message("Saving configuration...", None);
        match self.call(UPDATE_ADMIN_CONFIG, form.to_params()).await {
            Ok(_) => {
                self.log.show_message("Configuration saved.", Some(saving));
                info!("admin configuration saved");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "saving admin configuration failed");
                self.log.show_error(&err.to_string(), Some(saving));
                Err(err)
            }
        }
    }
}

/// Where the "Authenticate" button sends the administrator. The `next` URL
/// is always plain http so a single AuthSub prefix registration covers it.
pub fn authsub_request_url(host: &str) -> String {
    format!(
        "https://www.google.com/accounts/AuthSubRequest?next=http://{host}/admin/PersistAuthSubToken&scope=http%3A%2F%2Fgdata.youtube.com&session=1&secure=0"
    )
}

/// `YYYY-MM-DD HH:MM:SS`, zero padded.
pub fn format_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => display_value(other),
    }
}

fn parse_checkbox(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes" | "checked")
}
