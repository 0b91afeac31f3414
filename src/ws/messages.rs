//! Wire envelope and message type discriminator.

use std::fmt;
use std::str::FromStr;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::RelayError;

/// Top-level envelope exchanged over the negotiation channel.
///
/// `from` is whatever the client claims; it is never checked against the
/// connection's registered identity. `data` and any unknown top-level
/// fields are kept as raw JSON text, so a rewritten copy carries them
/// through byte for byte.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Message type as sent by the client. See [`MessageType`].
    pub msg_type: String,

    /// Claimed sender identity.
    pub from: Option<String>,

    /// Target identity for unicast types.
    pub to: Option<String>,

    /// Opaque payload, unparsed.
    pub data: Option<Box<RawValue>>,

    /// Any other top-level fields, in arrival order.
    pub extra: Vec<(String, Box<RawValue>)>,
}

impl Envelope {
    /// Parses an inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidEnvelope`] if the text is not a JSON
    /// object with a string `type`.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(RelayError::InvalidEnvelope)
    }

    /// Returns the declared type, or `None` if the relay does not know it.
    #[must_use]
    pub fn kind(&self) -> Option<MessageType> {
        self.msg_type.parse().ok()
    }

    /// Returns the non-empty string `data.id`, if any.
    ///
    /// Only `register` needs this, so the payload is parsed on demand.
    #[must_use]
    pub fn data_id(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct IdField {
            #[serde(default)]
            id: Option<Value>,
        }

        let raw = self.data.as_ref()?;
        let field: IdField = serde_json::from_str(raw.get()).ok()?;
        match field.id {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    /// Returns the non-empty `from` field, if any.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().filter(|from| !from.is_empty())
    }

    /// Returns a copy addressed to `recipient`.
    #[must_use]
    pub fn addressed_to(&self, recipient: &str) -> Self {
        Self {
            to: Some(recipient.to_string()),
            ..self.clone()
        }
    }

    /// `registered` confirmation for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Encode`] if the payload cannot be serialized.
    pub fn registered(identity: &str, timestamp: DateTime<Utc>) -> Result<Self, RelayError> {
        Self::outbound(
            MessageType::Registered,
            &serde_json::json!({
                "success": true,
                "id": identity,
                "timestamp": timestamp,
            }),
        )
    }

    /// `peer-list` carrying `peers`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Encode`] if the payload cannot be serialized.
    pub fn peer_list(peers: &[String]) -> Result<Self, RelayError> {
        Self::outbound(MessageType::PeerList, &serde_json::json!({ "peers": peers }))
    }

    /// `error` reply with a human-readable message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Encode`] if the payload cannot be serialized.
    pub fn error(message: &str, timestamp: DateTime<Utc>) -> Result<Self, RelayError> {
        Self::outbound(
            MessageType::Error,
            &serde_json::json!({
                "error": message,
                "timestamp": timestamp,
            }),
        )
    }

    fn outbound(kind: MessageType, data: &Value) -> Result<Self, RelayError> {
        let data =
            serde_json::value::to_raw_value(data).map_err(|e| RelayError::Encode(e.to_string()))?;
        Ok(Self {
            msg_type: kind.as_str().to_string(),
            from: None,
            to: None,
            data: Some(data),
            extra: Vec::new(),
        })
    }

    /// Serializes the envelope into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Utf8Bytes, RelayError> {
        serde_json::to_string(self)
            .map(Utf8Bytes::from)
            .map_err(|e| RelayError::Encode(e.to_string()))
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.msg_type)?;
        if let Some(from) = &self.from {
            map.serialize_entry("from", from)?;
        }
        if let Some(to) = &self.to {
            map.serialize_entry("to", to)?;
        }
        if let Some(data) = &self.data {
            map.serialize_entry("data", data)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = Envelope;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an envelope object with a string `type`")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Envelope, A::Error> {
        let mut msg_type = None;
        let mut from = None;
        let mut to = None;
        let mut data = None;
        let mut extra = Vec::new();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "type" => msg_type = Some(map.next_value::<String>()?),
                "from" => from = map.next_value::<Option<String>>()?,
                "to" => to = map.next_value::<Option<String>>()?,
                "data" => data = map.next_value::<Option<Box<RawValue>>>()?,
                _ => {
                    let value = map.next_value::<Box<RawValue>>()?;
                    extra.retain(|(existing, _): &(String, Box<RawValue>)| *existing != key);
                    extra.push((key, value));
                }
            }
        }

        Ok(Envelope {
            msg_type: msg_type.ok_or_else(|| <A::Error as de::Error>::missing_field("type"))?,
            from,
            to,
            data,
            extra,
        })
    }
}

/// Every `type` value in the protocol.
///
/// The last three are produced by the relay only; a client sending them
/// gets an unknown-type error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Bind the connection to an identity.
    Register,
    /// Session offer, unicast.
    Offer,
    /// Session answer, unicast.
    Answer,
    /// Connectivity candidate, fanned out to all other peers.
    IceCandidate,
    /// Transport endpoint info, fanned out to all other peers.
    UdpInfo,
    /// Request the current peer list.
    GetPeers,
    /// Registration confirmation.
    Registered,
    /// Current peer list.
    PeerList,
    /// Error reply.
    Error,
}

impl MessageType {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::UdpInfo => "udp-info",
            Self::GetPeers => "get-peers",
            Self::Registered => "registered",
            Self::PeerList => "peer-list",
            Self::Error => "error",
        }
    }
}

impl FromStr for MessageType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "register" => Self::Register,
            "offer" => Self::Offer,
            "answer" => Self::Answer,
            "ice-candidate" => Self::IceCandidate,
            "udp-info" => Self::UdpInfo,
            "get-peers" => Self::GetPeers,
            "registered" => Self::Registered,
            "peer-list" => Self::PeerList,
            "error" => Self::Error,
            other => return Err(RelayError::UnknownMessageType(other.to_string())),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
