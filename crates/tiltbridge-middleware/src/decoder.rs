//! Topic-framed decoder.
//!
//! Publishers prefix every frame with its topic label followed by a
//! separator (a single space by default):
//!
//! ```text
//! driver_input {"throttle": 50.0, "brake": 0.0, ...}
//! ```
//!
//! [`decode`] discards everything up to and including the first separator
//! and parses the remainder as a JSON object.  Every key the target record
//! requires is checked before typed deserialisation so a missing key is
//! reported as [`BridgeError::MissingField`] rather than a generic parse
//! failure.

use serde_json::Value;
use tiltbridge_types::{
    BridgeError, ChannelId, ChannelRecord, DriverInput, PanelConfig, Record,
};

/// Separator between the topic label and the payload.
pub const DEFAULT_SEPARATOR: char = ' ';

/// Split a raw frame into `(topic, payload)`.
///
/// # Errors
///
/// [`BridgeError::MalformedFrame`] when the frame is not UTF-8 or contains
/// no separator.
pub fn split_topic(raw: &[u8], separator: char) -> Result<(&str, &str), BridgeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| BridgeError::MalformedFrame(format!("frame is not UTF-8: {e}")))?;
    text.split_once(separator).ok_or_else(|| {
        BridgeError::MalformedFrame(format!("no topic separator {separator:?} in frame"))
    })
}

/// Decode a raw frame into a typed record.
pub fn decode<T: ChannelRecord>(raw: &[u8], separator: char) -> Result<T, BridgeError> {
    let (_topic, payload) = split_topic(raw, separator)?;
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| BridgeError::MalformedFrame(format!("invalid JSON payload: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(BridgeError::MalformedFrame(
            "payload is not a JSON object".to_string(),
        ));
    };
    if let Some(field) = T::REQUIRED_FIELDS
        .iter()
        .copied()
        .find(|field| !object.contains_key(*field))
    {
        return Err(BridgeError::MissingField {
            channel: T::CHANNEL,
            field,
        });
    }

    serde_json::from_value(value).map_err(|e| {
        BridgeError::MalformedFrame(format!("{} payload has wrong field types: {e}", T::CHANNEL))
    })
}

/// Decode a raw frame into the record type carried by `channel`.
pub fn decode_for(channel: ChannelId, raw: &[u8], separator: char) -> Result<Record, BridgeError> {
    match channel {
        ChannelId::DriverInput => decode::<DriverInput>(raw, separator).map(Record::from),
        ChannelId::ControlPanel => decode::<PanelConfig>(raw, separator).map(Record::from),
    }
}

/// Build a frame the way publishers do: `topic`, separator, JSON payload.
pub fn encode_frame<T: ChannelRecord>(
    topic: &str,
    record: &T,
    separator: char,
) -> Result<Vec<u8>, BridgeError> {
    let payload = serde_json::to_string(record)
        .map_err(|e| BridgeError::MalformedFrame(format!("cannot serialise record: {e}")))?;
    Ok(format!("{topic}{separator}{payload}").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRIVER_FRAME: &[u8] = br#"driver_input {"throttle": 50.0, "brake": 0.0, "clutch": 0.0, "steering": -20.0, "tilt_x": 0.0, "tilt_y": 0.0, "vibration": 0.0}"#;

    #[test]
    fn strips_topic_and_parses_driver_input() {
        let input: DriverInput = decode(DRIVER_FRAME, DEFAULT_SEPARATOR).unwrap();
        assert_eq!(input.throttle, 50.0);
        assert_eq!(input.steering, -20.0);
    }

    #[test]
    fn only_the_first_separator_is_consumed() {
        let (topic, payload) = split_topic(b"platform {\"a\": 1}", ' ').unwrap();
        assert_eq!(topic, "platform");
        assert_eq!(payload, "{\"a\": 1}");
    }

    #[test]
    fn custom_separator() {
        let panel: PanelConfig = decode(br#"platform|{"platform_status": false}"#, '|').unwrap();
        assert!(!panel.platform_status);
    }

    #[test]
    fn frame_without_separator_is_malformed() {
        let err = decode::<PanelConfig>(b"platform", ' ').unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFrame(_)), "got {err:?}");
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = decode::<PanelConfig>(b"platform {not json", ' ').unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFrame(_)));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        let err = decode::<PanelConfig>(b"platform [true]", ' ').unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFrame(_)));
    }

    #[test]
    fn non_utf8_frame_is_malformed() {
        let err = decode::<PanelConfig>(&[0x70, 0x20, 0xff, 0xfe], ' ').unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFrame(_)));
    }

    #[test]
    fn missing_key_names_the_field() {
        let frame = br#"driver_input {"throttle": 1.0, "clutch": 0.0, "steering": 0.0, "tilt_x": 0.0, "tilt_y": 0.0, "vibration": 0.0}"#;
        let err = decode::<DriverInput>(frame, ' ').unwrap_err();
        match err {
            BridgeError::MissingField { channel, field } => {
                assert_eq!(channel, ChannelId::DriverInput);
                assert_eq!(field, "brake");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let err = decode::<PanelConfig>(br#"platform {"platform_status": "yes"}"#, ' ').unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFrame(_)));
    }

    #[test]
    fn encoded_frame_decodes_to_identical_bits() {
        let original = DriverInput {
            throttle: 33.333333333333336,
            brake: 0.1 + 0.2,
            clutch: 1e-7,
            steering: -99.99999999999999,
            tilt_x: 12.5,
            tilt_y: -0.0001,
            vibration: 100.0,
        };
        let frame = encode_frame("driver_input", &original, DEFAULT_SEPARATOR).unwrap();
        let back: DriverInput = decode(&frame, DEFAULT_SEPARATOR).unwrap();
        assert_eq!(back.throttle.to_bits(), original.throttle.to_bits());
        assert_eq!(back.brake.to_bits(), original.brake.to_bits());
        assert_eq!(back.clutch.to_bits(), original.clutch.to_bits());
        assert_eq!(back.steering.to_bits(), original.steering.to_bits());
        assert_eq!(back.tilt_x.to_bits(), original.tilt_x.to_bits());
        assert_eq!(back.tilt_y.to_bits(), original.tilt_y.to_bits());
        assert_eq!(back.vibration.to_bits(), original.vibration.to_bits());
        assert_eq!(back, original);
    }

    #[test]
    fn decode_for_tags_record_with_channel() {
        let record = decode_for(ChannelId::DriverInput, DRIVER_FRAME, ' ').unwrap();
        assert_eq!(record.channel(), ChannelId::DriverInput);
        let record = decode_for(
            ChannelId::ControlPanel,
            br#"platform {"platform_status": true}"#,
            ' ',
        )
        .unwrap();
        assert_eq!(record, Record::Panel(PanelConfig { platform_status: true }));
    }
}
