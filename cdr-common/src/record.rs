use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A record as it comes out of a decoder, before any validation.
/// Every decoder converts its own representation into this shape, so that validation and
/// normalization only ever deal with optional strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub starttime: Option<String>,
    pub service: Option<String>,
    pub usage: Option<String>,
}

/// Names of the fields a `RawRecord` must carry, in the order they are checked.
pub const REQUIRED_FIELDS: [&str; 5] = ["source", "destination", "starttime", "service", "usage"];

impl RawRecord {
    /// Look up a field by name. Empty strings count as missing.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "source" => self.source.as_deref(),
            "destination" => self.destination.as_deref(),
            "starttime" => self.starttime.as_deref(),
            "service" => self.service.as_deref(),
            "usage" => self.usage.as_deref(),
            _ => None,
        };

        value.filter(|v| !v.is_empty())
    }

    /// Set a field by name, ignoring names we don't track.
    pub fn set_field(&mut self, name: &str, value: Option<String>) {
        match name {
            "source" => self.source = value,
            "destination" => self.destination = value,
            "starttime" => self.starttime = value,
            "service" => self.service = value,
            "usage" => self.usage = value,
            _ => {}
        }
    }

    /// Build a `RawRecord` out of a JSON object. Scalars are kept in their textual form, `null`
    /// is treated as absent.
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut record = RawRecord::default();

        for name in REQUIRED_FIELDS {
            let value = match object.get(name) {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s.to_owned()),
                Some(other) => Some(other.to_string()),
            };
            record.set_field(name, value);
        }

        record
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid ServiceType")]
pub struct ParseServiceTypeError(pub String);

/// The kinds of usage a CDR can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceType {
    Voice,
    Sms,
    Data,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Voice => "VOICE",
            ServiceType::Sms => "SMS",
            ServiceType::Data => "DATA",
        }
    }

    /// Human readable description of what a record of this service must look like.
    pub fn guidance(&self) -> &'static str {
        match self {
            ServiceType::Voice => {
                "VOICE records require: phone number source, phone number destination, usage in minutes"
            }
            ServiceType::Sms => {
                "SMS records require: phone number source, phone number destination, usage must be 1"
            }
            ServiceType::Data => {
                "DATA records require: phone number source, URL destination, usage in megabytes (MB)"
            }
        }
    }

    /// Whether the destination of this service is another subscriber's phone number.
    pub fn is_person_to_person(&self) -> bool {
        matches!(self, ServiceType::Voice | ServiceType::Sms)
    }
}

/// Service names are accepted in any case.
impl FromStr for ServiceType {
    type Err = ParseServiceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VOICE" => Ok(ServiceType::Voice),
            "SMS" => Ok(ServiceType::Sms),
            "DATA" => Ok(ServiceType::Data),
            _ => Err(ParseServiceTypeError(s.to_owned())),
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, normalized CDR. This is what gets stored and published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub file_name: String,
    pub source: String,
    pub destination: String,
    pub starttime: DateTime<Utc>,
    pub service: ServiceType,
    pub usage: f64,
}

impl CanonicalRecord {
    /// Records are keyed by their source number on the wire.
    pub fn key(&self) -> &str {
        &self.source
    }
}
