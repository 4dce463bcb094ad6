use crate::tagging::{merge_tags, TagError, TaggedName};

/// The kind of a series in Datadog's time-series model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesKind {
    /// A point-in-time value.
    Gauge,
    /// An absolute count over the report interval.
    Count,
    /// A count normalized over the report interval.
    Rate,
}

impl SeriesKind {
    // Integer type codes of the Datadog v2 series API; 0 is "unspecified".
    pub(crate) const fn type_code(self) -> u8 {
        match self {
            SeriesKind::Count => 1,
            SeriesKind::Rate => 2,
            SeriesKind::Gauge => 3,
        }
    }
}

/// One named, timestamped, tagged data point (or small ordered set of points).
///
/// Construction decodes any bracket-encoded tag suffix out of the metric name and merges the
/// decoded tags with the supplied tag list, with the supplied list winning on key collision. The
/// resulting series is immutable.
#[derive(Clone, Debug, PartialEq)]
pub struct DatadogSeries {
    metric: String,
    points: Vec<(i64, f64)>,
    tags: Vec<String>,
    host: String,
    kind: SeriesKind,
}

impl DatadogSeries {
    /// Creates a series of the given kind with a single point.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::EmptyMetricName`] if the decoded metric name is empty.
    pub fn new(
        kind: SeriesKind,
        encoded_name: &str,
        value: f64,
        timestamp: i64,
        host: &str,
        tags: &[String],
    ) -> Result<DatadogSeries, TagError> {
        let decoded = TaggedName::decode(encoded_name);
        if decoded.metric_name().trim().is_empty() {
            return Err(TagError::EmptyMetricName);
        }

        Ok(DatadogSeries {
            metric: decoded.metric_name().to_string(),
            points: vec![(timestamp, value)],
            tags: merge_tags(decoded.encoded_tags(), tags),
            host: host.to_string(),
            kind,
        })
    }

    /// Creates a gauge-kind series.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::EmptyMetricName`] if the decoded metric name is empty.
    pub fn gauge(
        encoded_name: &str,
        value: f64,
        timestamp: i64,
        host: &str,
        tags: &[String],
    ) -> Result<DatadogSeries, TagError> {
        Self::new(SeriesKind::Gauge, encoded_name, value, timestamp, host, tags)
    }

    /// Creates a count-kind series.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::EmptyMetricName`] if the decoded metric name is empty.
    pub fn count(
        encoded_name: &str,
        value: f64,
        timestamp: i64,
        host: &str,
        tags: &[String],
    ) -> Result<DatadogSeries, TagError> {
        Self::new(SeriesKind::Count, encoded_name, value, timestamp, host, tags)
    }

    /// Creates a rate-kind series.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::EmptyMetricName`] if the decoded metric name is empty.
    pub fn rate(
        encoded_name: &str,
        value: f64,
        timestamp: i64,
        host: &str,
        tags: &[String],
    ) -> Result<DatadogSeries, TagError> {
        Self::new(SeriesKind::Rate, encoded_name, value, timestamp, host, tags)
    }

    /// Returns a copy of this series with an additional point appended.
    #[must_use]
    pub fn with_point(mut self, timestamp: i64, value: f64) -> DatadogSeries {
        self.points.push((timestamp, value));
        self
    }

    /// Returns the decoded metric name.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Returns the `(timestamp, value)` points in insertion order. Never empty.
    pub fn points(&self) -> &[(i64, f64)] {
        &self.points
    }

    /// Returns the merged tag list.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the host this series is attributed to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the series kind.
    pub fn kind(&self) -> SeriesKind {
        self.kind
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)] // asserting on exact copies of input values
mod tests {
    use super::{DatadogSeries, SeriesKind};
    use crate::tagging::TagError;

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|tag| (*tag).to_string()).collect()
    }

    #[test]
    fn splits_name_and_merges_tags() {
        let series = DatadogSeries::count(
            "test[tag1:value1,tag2:value2,tag3:value3]",
            1.0,
            1234,
            "Test Host",
            &tags(&["env:prod", "version:1.0.0"]),
        )
        .unwrap();

        assert_eq!(series.metric(), "test");
        assert_eq!(
            series.tags(),
            tags(&["tag1:value1", "tag2:value2", "tag3:value3", "env:prod", "version:1.0.0"])
        );
        assert_eq!(series.points(), &[(1234, 1.0)]);
        assert_eq!(series.host(), "Test Host");
        assert_eq!(series.kind(), SeriesKind::Count);
    }

    #[test]
    fn external_tags_override_encoded_tags() {
        let series =
            DatadogSeries::gauge("test[env:dev]", 1.0, 1234, "host", &tags(&["env:prod"])).unwrap();
        assert_eq!(series.tags(), tags(&["env:prod"]));
    }

    #[test]
    fn rejects_empty_names() {
        assert_eq!(
            DatadogSeries::gauge("", 1.0, 1234, "host", &[]).unwrap_err(),
            TagError::EmptyMetricName
        );
    }

    #[test]
    fn appends_points_in_order() {
        let series = DatadogSeries::gauge("test", 1.0, 1234, "host", &[])
            .unwrap()
            .with_point(1235, 2.0);
        assert_eq!(series.points(), &[(1234, 1.0), (1235, 2.0)]);
    }
}
