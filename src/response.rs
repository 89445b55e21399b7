use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    /// Some list items were dropped; the rest are valid.
    PartialSuccess,
    Failure,
}

/// Typed outcome of a gateway call. Callers never see a raw fault.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub raw_text: String,
    pub parsed_value: Option<Value>,
    pub status: ResponseStatus,
    pub error: Option<GatewayError>,
    /// Invalid items dropped from a list response.
    pub skipped_count: usize,
}

impl Response {
    /// Raw provider text that has not been parsed yet.
    pub fn raw(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            parsed_value: None,
            status: ResponseStatus::Success,
            error: None,
            skipped_count: 0,
        }
    }

    pub fn parsed(raw_text: impl Into<String>, value: Value) -> Self {
        Self {
            parsed_value: Some(value),
            ..Self::raw(raw_text)
        }
    }

    pub fn failure(error: GatewayError) -> Self {
        let raw_text = error.raw_text().unwrap_or_default().to_string();
        Self {
            raw_text,
            parsed_value: None,
            status: ResponseStatus::Failure,
            error: Some(error),
            skipped_count: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, ResponseStatus::Failure)
    }

    /// Decode the parsed value into a caller-defined type.
    pub fn parsed_as<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.parsed_value
            .as_ref()
            .map(|value| T::deserialize(value))
    }
}

/// Outcome of a list call: one response per valid item.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub items: Vec<Response>,
    pub skipped_count: usize,
    pub status: ResponseStatus,
    pub error: Option<GatewayError>,
}

impl BatchResponse {
    /// Split a list-shaped response into per-item responses.
    pub fn from_response(response: Response) -> Self {
        if let Some(error) = response.error {
            return Self {
                items: Vec::new(),
                skipped_count: 0,
                status: ResponseStatus::Failure,
                error: Some(error),
            };
        }

        let items = match response.parsed_value {
            Some(Value::Array(values)) => values
                .into_iter()
                .map(|value| Response::parsed(value.to_string(), value))
                .collect(),
            Some(value) => vec![Response::parsed(response.raw_text, value)],
            None => Vec::new(),
        };

        Self {
            items,
            skipped_count: response.skipped_count,
            status: response.status,
            error: None,
        }
    }

    /// Decode every item into a caller-defined type.
    pub fn items_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        self.items
            .iter()
            .filter_map(|item| item.parsed_as::<T>())
            .collect()
    }
}
