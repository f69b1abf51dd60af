//! Provider response shapes.
//!
//! Panels are loose about types: ids and amounts arrive as numbers or
//! strings depending on the vendor, so everything is read leniently.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Outcome of an `add` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    Success { order_id: String },
    Failure { message: String },
    Malformed { raw: String },
}

impl ProviderResponse {
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_value(&value, body),
            Err(_) => ProviderResponse::Malformed {
                raw: body.to_string(),
            },
        }
    }

    fn from_value(value: &Value, raw: &str) -> Self {
        if let Some(order_id) = value.get("order").and_then(scalar_to_string) {
            return ProviderResponse::Success { order_id };
        }

        if let Some(message) = error_message(value) {
            return ProviderResponse::Failure { message };
        }

        ProviderResponse::Malformed {
            raw: raw.to_string(),
        }
    }
}

/// `{error: ...}` message, if the body is a rejection.
pub fn error_message(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(scalar_to_string)
        .filter(|message| !message.is_empty())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_to_string))
}

/// Answer to `action=status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderStatus {
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub charge: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_count: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub remains: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
}

/// Answer to `action=balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Balance {
    #[serde(deserialize_with = "lenient_string")]
    pub balance: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
}

/// One entry of `action=services`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub service: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub min: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub max: Option<String>,
}
