//! Stream events and wire frames

use std::time::Duration;

use axum::response::sse;
use serde::Serialize;

/// Data payload of the preamble frame
pub const HELLO: &str = "hello";

/// Data payload of the close frame
pub const GOODBYE: &str = "byebye";

/// One `{id, payload}` unit sent over an open stream
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    /// Optional event id; clients resume from it with `Last-Event-ID`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// JSON payload
    pub data: serde_json::Value,
}

impl Event {
    /// Event without an id
    #[must_use]
    pub fn new(data: serde_json::Value) -> Self {
        Self { id: None, data }
    }

    /// Event carrying a resumable id
    pub fn with_id(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            data,
        }
    }

    /// Serialize any resource into an event payload
    pub fn from_resource<T: Serialize>(resource: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(resource)?))
    }
}

/// A frame written to the client, in emission order
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Stream preamble: reconnect hint plus an `open` event
    Open {
        /// Client reconnect delay
        retry: Duration,
    },
    /// A data event
    Data(Event),
    /// Terminal in-stream error
    Error(String),
    /// Orderly end of stream
    Close,
}

impl Frame {
    /// True for frames that carry a data event
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}

impl From<Frame> for sse::Event {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Open { retry } => sse::Event::default()
                .retry(retry)
                .event("open")
                .data(json_string(HELLO)),
            Frame::Data(event) => {
                let mut out = sse::Event::default();
                if let Some(id) = event.id {
                    out = out.id(id);
                }
                out.data(event.data.to_string())
            }
            Frame::Error(message) => sse::Event::default()
                .event("error")
                .data(json_string(&message)),
            Frame::Close => sse::Event::default()
                .event("close")
                .data(json_string(GOODBYE)),
        }
    }
}

fn json_string(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_from_resource() {
        #[derive(Serialize)]
        struct Resource {
            id: &'static str,
        }

        let event = Event::from_resource(&Resource { id: "GA" }).unwrap();
        assert_eq!(event.id, None);
        assert_eq!(event.data, json!({"id": "GA"}));
    }

    #[test]
    fn test_json_string_escapes() {
        assert_eq!(json_string("hello"), "\"hello\"");
        assert_eq!(json_string("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_is_data() {
        assert!(Frame::Data(Event::new(json!(1))).is_data());
        assert!(!Frame::Close.is_data());
    }
}
