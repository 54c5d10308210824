//! Piece metadata: the declared capabilities of a connector package
//!
//! Metadata is plain data resolved from a piece registry at runtime. Nothing
//! in the core branches on a piece's identity; validation is driven purely by
//! the declared `PropertyType` of each prop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared props of an action, trigger or auth, keyed by prop name
pub type PropertyMap = BTreeMap<String, PieceProperty>;

/// Kind of a declared prop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    ShortText,
    LongText,
    Markdown,
    Dropdown,
    StaticDropdown,
    Number,
    Checkbox,
    Oauth2,
    SecretText,
    Array,
    Object,
    BasicAuth,
    Json,
    MultiSelectDropdown,
    StaticMultiSelectDropdown,
    Dynamic,
    CustomAuth,
    DateTime,
    File,
    Color,
    /// Any type introduced by a newer registry than this build knows about
    #[serde(other)]
    Unknown,
}

impl PropertyType {
    /// Props that hold a credential rather than user data
    pub fn is_auth(self) -> bool {
        matches!(
            self,
            PropertyType::SecretText
                | PropertyType::Oauth2
                | PropertyType::BasicAuth
                | PropertyType::CustomAuth
        )
    }
}

/// A single declared prop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceProperty {
    pub display_name: String,

    #[serde(rename = "type")]
    pub property_type: PropertyType,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Item shape for ARRAY props whose items are objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyMap>,
}

impl PieceProperty {
    pub fn new(display_name: &str, property_type: PropertyType, required: bool) -> Self {
        Self {
            display_name: display_name.to_string(),
            property_type,
            required,
            description: None,
            default_value: None,
            properties: None,
        }
    }
}

/// How a trigger is activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerStrategy {
    Polling,
    Webhook,
    AppWebhook,
}

impl TriggerStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerStrategy::Polling => "POLLING",
            TriggerStrategy::Webhook => "WEBHOOK",
            TriggerStrategy::AppWebhook => "APP_WEBHOOK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POLLING" => Some(TriggerStrategy::Polling),
            "WEBHOOK" => Some(TriggerStrategy::Webhook),
            "APP_WEBHOOK" => Some(TriggerStrategy::AppWebhook),
            _ => None,
        }
    }
}

/// Webhook renewal declared by a WEBHOOK trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookRenewConfiguration {
    Cron {
        #[serde(rename = "cronExpression")]
        cron_expression: String,
    },
    None,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMetadata {
    pub name: String,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub props: PropertyMap,

    #[serde(default = "default_true")]
    pub require_auth: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMetadata {
    pub name: String,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub props: PropertyMap,

    #[serde(rename = "type")]
    pub strategy: TriggerStrategy,

    #[serde(default = "default_true")]
    pub require_auth: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_configuration: Option<WebhookRenewConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<Value>,
}

impl TriggerMetadata {
    /// Cron expression of the webhook renewal, if the trigger renews on a schedule
    pub fn renewal_cron(&self) -> Option<&str> {
        match &self.renew_configuration {
            Some(WebhookRenewConfiguration::Cron { cron_expression }) => Some(cron_expression),
            Some(WebhookRenewConfiguration::None) | None => None,
        }
    }
}

/// Declared capabilities of one version of a piece
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceMetadata {
    pub name: String,

    pub display_name: String,

    /// Concrete semver version
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<PieceProperty>,

    #[serde(default)]
    pub actions: BTreeMap<String, ActionMetadata>,

    #[serde(default)]
    pub triggers: BTreeMap<String, TriggerMetadata>,
}

impl PieceMetadata {
    pub fn action(&self, name: &str) -> Option<&ActionMetadata> {
        self.actions.get(name)
    }

    pub fn trigger(&self, name: &str) -> Option<&TriggerMetadata> {
        self.triggers.get(name)
    }
}
