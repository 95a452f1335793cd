//! JSON encoder/decoder settings shared by generated operations.
//!
//! Generated `encode_body` and `decode_response` implementations receive a
//! [`JsonCodec`] rather than calling `serde_json` directly, so the client
//! owns serialization policy — in particular the date-decoding strategy,
//! which accepts several ISO-8601 variants plus caller-supplied formats.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DecodeError;

/// Serialization settings applied to every request body and response body.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    /// Extra `chrono` format strings tried after the built-in ISO-8601
    /// variants, in order. Parsed as naive timestamps and assumed UTC.
    extra_date_formats: Vec<String>,
}

impl JsonCodec {
    /// Codec with the default date strategy and no extra formats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a custom date format (chrono `strftime` syntax) to the
    /// strategy. Formats are tried in insertion order.
    #[must_use]
    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.extra_date_formats.push(format.into());
        self
    }

    /// Deserializes a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] on malformed input.
    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(body).map_err(DecodeError::Json)
    }

    /// Serializes a value to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be represented as JSON.
    pub fn encode<T: Serialize>(&self, value: &T) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Parses a date string against the configured strategy.
    ///
    /// Accepted in order: RFC 3339 (with or without fractional seconds),
    /// `YYYY-MM-DDTHH:MM:SS` (assumed UTC), plain `YYYY-MM-DD` (midnight
    /// UTC), then each extra format.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Date`] when no format matches.
    pub fn decode_date(&self, raw: &str) -> Result<DateTime<Utc>, DecodeError> {
        let rfc3339_err = match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => return Ok(dt.with_timezone(&Utc)),
            Err(e) => e,
        };
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
            return Ok(naive.and_utc());
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
        for format in &self.extra_date_formats {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(naive.and_utc());
            }
        }
        Err(DecodeError::Date(rfc3339_err))
    }
}
