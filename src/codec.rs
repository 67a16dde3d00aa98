use crate::{event::LeadershipEvent, Result};

/// Wire encoding for gossiped leadership events.
pub trait EventCodec: Send + Sync + std::fmt::Debug {
    fn encode(&self, event: &LeadershipEvent) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<LeadershipEvent>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl EventCodec for BincodeCodec {
    fn encode(&self, event: &LeadershipEvent) -> Result<Vec<u8>> {
        Ok(bincode::serialize(event)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<LeadershipEvent> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Leadership, NodeId};
    use crate::Error;

    #[test]
    fn test_event_survives_encoding() {
        let codec = BincodeCodec;
        let event = LeadershipEvent::booted(Leadership::new("topic", NodeId::new(), 42));

        let bytes = codec.encode(&event).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let codec = BincodeCodec;
        let event = LeadershipEvent::elected(Leadership::new("topic", NodeId::new(), 1));
        let bytes = codec.encode(&event).unwrap();

        let result = codec.decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
