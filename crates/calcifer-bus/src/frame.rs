// ── Inbound feedback frames ──
//
// A `FeedbackFrame` is the raw unit handed over by the broker adapter:
// routing key, optional broker message id, and the payload bytes as text.
// `parse()` is the single place where wire text becomes typed data;
// everything past this point works with `ParsedFeedback`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::payload::FeedbackValue;
use crate::routing::StateRoute;

/// Raw inbound message from the bus, before any validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackFrame {
    /// Dot-separated routing key as received.
    pub routing_key: String,
    /// Broker-assigned message id, if the broker provides one.
    pub message_id: Option<String>,
    /// Raw payload as UTF-8 text.
    pub payload: String,
    /// When the adapter received the frame.
    pub received_at: DateTime<Utc>,
}

impl FeedbackFrame {
    /// Construct a frame stamped with the current time.
    pub fn new(
        routing_key: impl Into<String>,
        message_id: Option<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            message_id,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Decode routing key and payload. Frames that fail here are
    /// dead-letter candidates; the error says why.
    pub fn parse(&self) -> Result<ParsedFeedback, BusError> {
        let route = StateRoute::parse(&self.routing_key)?;
        let value = FeedbackValue::parse(route.family, &self.payload)?;
        Ok(ParsedFeedback {
            route,
            value,
            message_id: self.message_id.clone(),
            received_at: self.received_at,
        })
    }
}

/// A fully decoded feedback message.
#[derive(Debug, Clone)]
pub struct ParsedFeedback {
    pub route: StateRoute,
    pub value: FeedbackValue,
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}
