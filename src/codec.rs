//! Versioned wire codec for fragments in flight.
//!
//! Bags and folds cross node boundaries as an explicit envelope: a version
//! byte plus a serialized payload. The codec is deliberately decoupled from
//! the engine — the engine only moves [`Envelope`] values, and a sending
//! node removes a fragment from its queue only after encoding succeeded,
//! so a codec failure delays work rather than losing it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// A fragment encoded for transfer between nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version the payload was encoded with.
    pub version: u8,
    /// Serialized fragment bytes.
    pub payload: Vec<u8>,
}

/// Encode a fragment for transfer.
pub fn encode_fragment<T: Serialize>(node: usize, value: &T) -> Result<Envelope, SchedulerError> {
    let payload = serde_json::to_vec(value).map_err(|e| SchedulerError::Encoding {
        node,
        detail: e.to_string(),
    })?;
    Ok(Envelope {
        version: WIRE_VERSION,
        payload,
    })
}

/// Decode a received fragment, rejecting unknown wire versions.
pub fn decode_fragment<T: DeserializeOwned>(
    node: usize,
    envelope: &Envelope,
) -> Result<T, SchedulerError> {
    if envelope.version != WIRE_VERSION {
        return Err(SchedulerError::Encoding {
            node,
            detail: format!(
                "wire version {} not supported (expected {})",
                envelope.version, WIRE_VERSION
            ),
        });
    }
    serde_json::from_slice(&envelope.payload).map_err(|e| SchedulerError::Encoding {
        node,
        detail: e.to_string(),
    })
}
