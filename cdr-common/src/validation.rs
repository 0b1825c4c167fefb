//! # Validation
//!
//! Rules deciding whether a `RawRecord` may become a `CanonicalRecord`.
//! Validation never short-circuits after the required-fields check: every rule that applies to a
//! record contributes its own error, so a rejected row can be fixed in one go.
use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::record::{RawRecord, ServiceType, REQUIRED_FIELDS};

/// Longest plausible voice call, in minutes.
pub const MAX_VOICE_MINUTES: f64 = 1440.0;
/// Largest plausible data session, in megabytes.
pub const MAX_DATA_MEGABYTES: f64 = 100_000.0;
/// Every SMS record stands for exactly one message.
pub const SMS_USAGE: f64 = 1.0;
/// Records starting more than ten years before validation are rejected.
pub const MAX_RECORD_AGE_MONTHS: u32 = 12 * 10;

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9][0-9]{1,14}$").expect("phone pattern is a valid regex"));

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(http|https)://[a-zA-Z0-9]+([-.][a-zA-Z0-9]+)*\.[a-zA-Z]{2,}(:[0-9]{1,5})?(/.*)?$",
    )
    .expect("url pattern is a valid regex")
});

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
];

/// Enumeration of reasons a record can be rejected for.
/// The `Display` output of each variant is the message reported back for the record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid source format: {0}")]
    InvalidSource(String),
    #[error("Invalid service type: {0}. Must be one of: VOICE, SMS, DATA")]
    InvalidService(String),
    #[error("Invalid destination format for {service}: {destination}. Should be a phone number.")]
    InvalidPhoneDestination {
        service: ServiceType,
        destination: String,
    },
    #[error("Invalid URL format for DATA service: {0}")]
    InvalidUrlDestination(String),
    #[error("Usage must be a number: {0}")]
    UsageNotANumber(String),
    #[error("Usage must be non-negative: {0}")]
    NegativeUsage(f64),
    #[error("Voice call duration ({0} minutes) exceeds reasonable limit")]
    VoiceUsageTooHigh(f64),
    #[error("Data usage ({0} MB) exceeds reasonable limit")]
    DataUsageTooHigh(f64),
    #[error("SMS usage must be exactly 1, got: {0}")]
    SmsUsageNotOne(f64),
    #[error("Invalid datetime format: {0}")]
    InvalidStartTime(String),
    #[error("StartTime cannot be in the future: {0}")]
    StartTimeInFuture(String),
    #[error("StartTime is unreasonably old: {0}")]
    StartTimeTooOld(String),
    #[error("Source and destination cannot be identical for {0}")]
    IdenticalEndpoints(ServiceType),
}

/// Parse an ISO-8601 timestamp. A trailing `Z` is read as `+00:00`, timestamps without an offset
/// are taken to be UTC and a bare date means midnight.
///
/// This is the only timestamp parser in the pipeline: the normalizer relies on it as well, so
/// anything accepted during validation can be normalized.
pub fn parse_starttime(value: &str) -> Option<DateTime<Utc>> {
    // chrono skips whitespace before numeric fields, ISO-8601 does not.
    if value.trim() != value {
        return None;
    }

    let value = match value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        Some(without_zulu) => format!("{without_zulu}+00:00"),
        None => value.to_owned(),
    };

    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&value, format) {
            return Some(parsed.and_utc());
        }
    }

    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}

/// Parse a usage amount. Surrounding whitespace is tolerated, NaN and infinities are not usage.
pub fn parse_usage(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|usage| usage.is_finite())
}

pub fn is_phone_number(value: &str) -> bool {
    PHONE_PATTERN.is_match(value)
}

/// Strict pattern first, then any URL that has both a scheme and a host.
pub fn is_absolute_url(value: &str) -> bool {
    if URL_PATTERN.is_match(value) {
        return true;
    }

    // The parser repairs `http:host` and `https:\\host` into absolute URLs, so the authority
    // must be spelled out in the input itself.
    let has_authority = value.split_once("://").is_some_and(|(scheme, rest)| {
        !scheme.is_empty() && !rest.is_empty() && !rest.starts_with('/')
    });
    if !has_authority {
        return false;
    }

    match url::Url::parse(value) {
        Ok(parsed) => !parsed.scheme().is_empty() && parsed.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Validate a record against the current time.
pub fn validate(record: &RawRecord) -> Result<(), Vec<ValidationError>> {
    validate_at(record, Utc::now())
}

/// Validate a record, using `now` as the reference for the time window checks.
pub fn validate_at(record: &RawRecord, now: DateTime<Utc>) -> Result<(), Vec<ValidationError>> {
    let missing: Vec<ValidationError> = REQUIRED_FIELDS
        .into_iter()
        .filter(|name| record.field(name).is_none())
        .map(ValidationError::MissingField)
        .collect();

    if !missing.is_empty() {
        return Err(missing);
    }

    // All required fields are present past this point.
    let source = record.field("source").unwrap_or_default();
    let destination = record.field("destination").unwrap_or_default();
    let starttime = record.field("starttime").unwrap_or_default();
    let raw_service = record.field("service").unwrap_or_default();
    let raw_usage = record.field("usage").unwrap_or_default();

    let mut errors = Vec::new();

    if !is_phone_number(source) {
        errors.push(ValidationError::InvalidSource(source.to_owned()));
    }

    let service = raw_service.parse::<ServiceType>().ok();

    match service {
        None => errors.push(ValidationError::InvalidService(raw_service.to_owned())),
        Some(service) => {
            check_destination(service, destination, &mut errors);
            check_usage(service, raw_usage, &mut errors);
        }
    }

    check_starttime(starttime, now, &mut errors);

    if let Some(service) = service {
        if service.is_person_to_person() && source == destination {
            errors.push(ValidationError::IdenticalEndpoints(service));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_destination(service: ServiceType, destination: &str, errors: &mut Vec<ValidationError>) {
    match service {
        ServiceType::Voice | ServiceType::Sms => {
            if !is_phone_number(destination) {
                errors.push(ValidationError::InvalidPhoneDestination {
                    service,
                    destination: destination.to_owned(),
                });
            }
        }
        ServiceType::Data => {
            if !is_absolute_url(destination) {
                errors.push(ValidationError::InvalidUrlDestination(destination.to_owned()));
            }
        }
    }
}

fn check_usage(service: ServiceType, raw_usage: &str, errors: &mut Vec<ValidationError>) {
    let Some(usage) = parse_usage(raw_usage) else {
        errors.push(ValidationError::UsageNotANumber(raw_usage.to_owned()));
        return;
    };

    if usage < 0.0 {
        errors.push(ValidationError::NegativeUsage(usage));
    }

    match service {
        ServiceType::Voice if usage > MAX_VOICE_MINUTES => {
            errors.push(ValidationError::VoiceUsageTooHigh(usage))
        }
        ServiceType::Data if usage > MAX_DATA_MEGABYTES => {
            errors.push(ValidationError::DataUsageTooHigh(usage))
        }
        ServiceType::Sms if usage != SMS_USAGE => {
            errors.push(ValidationError::SmsUsageNotOne(usage))
        }
        _ => {}
    }
}

fn check_starttime(raw: &str, now: DateTime<Utc>, errors: &mut Vec<ValidationError>) {
    let Some(starttime) = parse_starttime(raw) else {
        errors.push(ValidationError::InvalidStartTime(raw.to_owned()));
        return;
    };

    if starttime > now {
        errors.push(ValidationError::StartTimeInFuture(raw.to_owned()));
    }

    let oldest_allowed = now
        .checked_sub_months(Months::new(MAX_RECORD_AGE_MONTHS))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    if starttime < oldest_allowed {
        errors.push(ValidationError::StartTimeTooOld(raw.to_owned()));
    }
}
