use super::frame::{PushFrame, frame_payload};
use super::types::InboundMessage;

/// Decision produced by a decoder running inside the reader task.
///
/// Decoding happens in the IO loop so that only meaningful messages reach the connection
/// actor's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeAction {
    /// Keep-alive or otherwise uninteresting frame.
    Ignore,
    /// A message to record and dispatch.
    Deliver(InboundMessage),
    /// Payload that should have been a message but could not be understood.
    Reject(String),
}

/// Turns raw push frames into inbound messages.
pub trait FrameDecoder: Clone + Send + Sync + 'static {
    fn decode(&mut self, frame: &PushFrame) -> DecodeAction;
}

/// Default decoder for the JSON wire format (see [`InboundMessage`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl FrameDecoder for JsonDecoder {
    fn decode(&mut self, frame: &PushFrame) -> DecodeAction {
        let Some(payload) = frame_payload(frame) else {
            return DecodeAction::Ignore;
        };
        if payload.iter().all(u8::is_ascii_whitespace) {
            return DecodeAction::Ignore;
        }
        match decode_message(payload) {
            Ok(message) => DecodeAction::Deliver(message),
            Err(err) => DecodeAction::Reject(err),
        }
    }
}

/// Parse a single JSON message.
pub fn decode_message(payload: &[u8]) -> Result<InboundMessage, String> {
    sonic_rs::from_slice::<InboundMessage>(payload).map_err(|err| err.to_string())
}

/// Serialise a message into its wire form.
pub fn encode_message(message: &InboundMessage) -> String {
    // Plain tagged enum of strings; serialisation cannot fail.
    sonic_rs::to_string(message).unwrap_or_default()
}
