use serde::Serialize;
use thiserror::Error;

use crate::series::DatadogSeries;

/// Errors that could occur while encoding a series payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// `append` or `finish` was called before `start`.
    #[error("serializer has not been started")]
    NotStarted,

    /// `start` was called on an already-started serializer.
    #[error("serializer has already been started")]
    AlreadyStarted,

    /// The serializer was used again after `finish`.
    #[error("serializer has already been finished")]
    Finished,

    /// A series failed to encode as JSON.
    #[error("failed to encode series: {0}")]
    Json(#[from] serde_json::Error),
}

enum SerializerState {
    Idle,
    Open { first: bool },
    Finished,
}

/// Streams an ordered sequence of [`DatadogSeries`] into one Datadog v2 `series` JSON payload.
///
/// The serializer is an explicit three-phase state machine -- [`start`][Self::start], zero or more
/// [`append`][Self::append]s, [`finish`][Self::finish] -- and is single-use. Each appended series
/// is written straight into the output buffer, so memory stays proportional to the encoded
/// payload rather than to the number of series objects a cycle produces.
pub struct SeriesSerializer {
    state: SerializerState,
    buf: String,
}

#[derive(Serialize)]
struct WireResource<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    resource_type: &'static str,
}

#[derive(Serialize)]
struct WireSeries<'a> {
    metric: &'a str,
    points: &'a [(i64, f64)],
    tags: &'a [String],
    #[serde(rename = "type")]
    series_type: u8,
    resources: [WireResource<'a>; 1],
}

impl SeriesSerializer {
    /// Creates an idle serializer.
    pub fn new() -> SeriesSerializer {
        SeriesSerializer { state: SerializerState::Idle, buf: String::new() }
    }

    /// Opens the payload object.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::AlreadyStarted`] or [`EncodeError::Finished`] when called out of
    /// phase.
    pub fn start(&mut self) -> Result<(), EncodeError> {
        match self.state {
            SerializerState::Idle => {
                self.buf.push_str(r#"{"series":["#);
                self.state = SerializerState::Open { first: true };
                Ok(())
            }
            SerializerState::Open { .. } => Err(EncodeError::AlreadyStarted),
            SerializerState::Finished => Err(EncodeError::Finished),
        }
    }

    /// Streams one series into the payload.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::NotStarted`] or [`EncodeError::Finished`] when called out of phase,
    /// and [`EncodeError::Json`] if the series fails to encode (the in-progress payload is left
    /// intact in that case).
    pub fn append(&mut self, series: &DatadogSeries) -> Result<(), EncodeError> {
        match &mut self.state {
            SerializerState::Idle => Err(EncodeError::NotStarted),
            SerializerState::Finished => Err(EncodeError::Finished),
            SerializerState::Open { first } => {
                // Encode fully before touching the buffer so a failure never leaves a dangling
                // separator behind.
                let encoded = serde_json::to_string(&WireSeries {
                    metric: series.metric(),
                    points: series.points(),
                    tags: series.tags(),
                    series_type: series.kind().type_code(),
                    resources: [WireResource { name: series.host(), resource_type: "host" }],
                })?;

                if !*first {
                    self.buf.push(',');
                }
                *first = false;
                self.buf.push_str(&encoded);
                Ok(())
            }
        }
    }

    /// Closes the payload object and returns the encoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::NotStarted`] or [`EncodeError::Finished`] when called out of phase.
    pub fn finish(&mut self) -> Result<String, EncodeError> {
        match self.state {
            SerializerState::Idle => Err(EncodeError::NotStarted),
            SerializerState::Finished => Err(EncodeError::Finished),
            SerializerState::Open { .. } => {
                self.buf.push_str("]}");
                self.state = SerializerState::Finished;
                Ok(std::mem::take(&mut self.buf))
            }
        }
    }
}

impl Default for SeriesSerializer {
    fn default() -> Self {
        SeriesSerializer::new()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)] // asserting on exact copies of input values
mod tests {
    use serde_json::Value;

    use super::{EncodeError, SeriesSerializer};
    use crate::series::DatadogSeries;

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|tag| (*tag).to_string()).collect()
    }

    #[test]
    fn rejects_out_of_phase_calls() {
        let series = DatadogSeries::gauge("test", 1.0, 1234, "host", &[]).unwrap();

        let mut serializer = SeriesSerializer::new();
        assert!(matches!(serializer.append(&series), Err(EncodeError::NotStarted)));
        assert!(matches!(serializer.finish(), Err(EncodeError::NotStarted)));

        serializer.start().unwrap();
        assert!(matches!(serializer.start(), Err(EncodeError::AlreadyStarted)));

        serializer.finish().unwrap();
        assert!(matches!(serializer.start(), Err(EncodeError::Finished)));
        assert!(matches!(serializer.append(&series), Err(EncodeError::Finished)));
        assert!(matches!(serializer.finish(), Err(EncodeError::Finished)));
    }

    #[test]
    fn encodes_an_empty_cycle() {
        let mut serializer = SeriesSerializer::new();
        serializer.start().unwrap();
        assert_eq!(serializer.finish().unwrap(), r#"{"series":[]}"#);
    }

    #[test]
    fn encodes_the_v2_series_shape() {
        let mut serializer = SeriesSerializer::new();
        serializer.start().unwrap();
        serializer
            .append(
                &DatadogSeries::gauge("test", 42.5, 1234, "hostname", &tags(&["env:prod"])).unwrap(),
            )
            .unwrap();
        let payload = serializer.finish().unwrap();

        let parsed: Value = serde_json::from_str(&payload).unwrap();
        let series = &parsed["series"][0];
        assert_eq!(series["metric"], "test");
        assert_eq!(series["points"][0][0], 1234);
        assert_eq!(series["points"][0][1], 42.5);
        assert_eq!(series["tags"][0], "env:prod");
        assert_eq!(series["type"], 3);
        assert_eq!(series["resources"][0]["name"], "hostname");
        assert_eq!(series["resources"][0]["type"], "host");
    }

    #[test]
    fn round_trips_every_series_in_a_cycle() {
        let host = "hostname";
        let cycle = [
            DatadogSeries::gauge("gauge", 1.5, 1000, host, &tags(&["env:prod"])).unwrap(),
            DatadogSeries::count("requests", 100.0, 1000, host, &tags(&["env:prod", "zone:a"]))
                .unwrap(),
            DatadogSeries::rate("throughput", 2.25, 1001, host, &[]).unwrap(),
            DatadogSeries::gauge("multi", 1.0, 1000, host, &[]).unwrap().with_point(1001, 2.0),
        ];

        let mut serializer = SeriesSerializer::new();
        serializer.start().unwrap();
        for series in &cycle {
            serializer.append(series).unwrap();
        }
        let payload = serializer.finish().unwrap();

        let parsed: Value = serde_json::from_str(&payload).unwrap();
        let decoded = parsed["series"].as_array().unwrap();
        assert_eq!(decoded.len(), cycle.len());

        for (series, value) in cycle.iter().zip(decoded) {
            assert_eq!(value["metric"], series.metric());
            assert_eq!(value["type"], series.kind().type_code());
            assert_eq!(value["resources"][0]["name"], host);

            let points = value["points"].as_array().unwrap();
            assert_eq!(points.len(), series.points().len());
            for (point, expected) in points.iter().zip(series.points()) {
                assert_eq!(point[0].as_i64().unwrap(), expected.0);
                assert_eq!(point[1].as_f64().unwrap(), expected.1);
            }

            let decoded_tags: Vec<&str> =
                value["tags"].as_array().unwrap().iter().map(|t| t.as_str().unwrap()).collect();
            assert_eq!(decoded_tags, series.tags());
        }
    }
}
