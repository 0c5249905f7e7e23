//! Decoding of inbound transport messages into [`Reading`]s.
//!
//! Topics follow `<prefix>/<device>/<measurement>` and carry a UTF-8
//! decimal number as payload.

use sensorlog_types::Reading;

use crate::IngestError;

/// Topic prefix used by the sensors when none is configured.
pub const DEFAULT_TOPIC_PREFIX: &str = "home";

/// Layout of the topics sensors publish on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    prefix: String,
}

impl TopicLayout {
    /// Create a layout for the given first topic segment.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The first topic segment.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The wildcard subscription covering every device and measurement.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.prefix)
    }

    /// Split a topic into `(device, measurement)`.
    pub fn split<'a>(&self, topic: &'a str) -> Result<(&'a str, &'a str), IngestError> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() != 3 {
            return Err(IngestError::malformed(
                topic,
                format!("expected 3 topic segments, got {}", segments.len()),
            ));
        }
        if segments[0] != self.prefix {
            return Err(IngestError::malformed(
                topic,
                format!("topic does not start with {:?}", self.prefix),
            ));
        }

        let (device, measurement) = (segments[1], segments[2]);
        if device.is_empty() || measurement.is_empty() {
            return Err(IngestError::malformed(topic, "empty device or measurement"));
        }

        Ok((device, measurement))
    }

    /// Decode one message into a reading stamped with `timestamp_ms`.
    ///
    /// Whitespace around the number is tolerated. Non-finite values are
    /// rejected so they never reach the filter.
    pub fn decode(
        &self,
        topic: &str,
        payload: &[u8],
        timestamp_ms: u64,
    ) -> Result<Reading, IngestError> {
        let (device, measurement) = self.split(topic)?;

        let text = std::str::from_utf8(payload)
            .map_err(|_| IngestError::malformed(topic, "payload is not UTF-8"))?;
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| IngestError::malformed(topic, format!("{:?} is not a number", text)))?;
        if !value.is_finite() {
            return Err(IngestError::malformed(topic, "value is not finite"));
        }

        Ok(Reading::new(device, measurement, value, timestamp_ms))
    }
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> TopicLayout {
        TopicLayout::default()
    }

    #[test]
    fn decodes_well_formed_message() {
        let reading = layout()
            .decode("home/kitchen/temperature", b"21.75", 42)
            .unwrap();

        assert_eq!(reading.device, "kitchen");
        assert_eq!(reading.measurement, "temperature");
        assert_eq!(reading.value, 21.75);
        assert_eq!(reading.timestamp_ms, 42);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let reading = layout().decode("home/porch/humidity", b" 55\n", 0).unwrap();
        assert_eq!(reading.value, 55.0);
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for topic in ["home/kitchen", "home/kitchen/temperature/raw", "home"] {
            let err = layout().decode(topic, b"1.0", 0).unwrap_err();
            assert!(matches!(err, IngestError::MalformedReading { .. }), "{topic}");
        }
    }

    #[test]
    fn rejects_foreign_prefix_and_empty_segments() {
        assert!(layout().decode("office/kitchen/temperature", b"1", 0).is_err());
        assert!(layout().decode("home//temperature", b"1", 0).is_err());
        assert!(layout().decode("home/kitchen/", b"1", 0).is_err());
    }

    #[test]
    fn rejects_bad_payloads() {
        for payload in [&b"warm"[..], b"", b"\xff\xfe", b"NaN", b"inf"] {
            let err = layout()
                .decode("home/kitchen/temperature", payload, 0)
                .unwrap_err();
            assert!(matches!(err, IngestError::MalformedReading { .. }));
        }
    }

    #[test]
    fn subscription_covers_prefix() {
        assert_eq!(layout().subscription(), "home/#");
        assert_eq!(TopicLayout::new("lab").subscription(), "lab/#");
    }
}
