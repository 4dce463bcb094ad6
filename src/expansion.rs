use serde::Deserialize;

/// A derived statistic that a histogram or timer can expand into.
///
/// The serialized names match the metric-name suffixes used on the wire, so an expansion list in
/// an application config file reads the same as the resulting metric names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Expansion {
    /// Number of recorded values.
    #[serde(rename = "count")]
    Count,
    /// Largest recorded value.
    #[serde(rename = "max")]
    Max,
    /// Arithmetic mean.
    #[serde(rename = "mean")]
    Mean,
    /// Smallest recorded value.
    #[serde(rename = "min")]
    Min,
    /// Standard deviation.
    #[serde(rename = "stddev")]
    StdDev,
    /// 50th percentile.
    #[serde(rename = "median")]
    Median,
    /// 75th percentile.
    #[serde(rename = "p75")]
    P75,
    /// 95th percentile.
    #[serde(rename = "p95")]
    P95,
    /// 98th percentile.
    #[serde(rename = "p98")]
    P98,
    /// 99th percentile.
    #[serde(rename = "p99")]
    P99,
    /// 99.9th percentile.
    #[serde(rename = "p999")]
    P999,
    /// One-minute exponentially-weighted rate.
    #[serde(rename = "1MinuteRate")]
    OneMinuteRate,
    /// Five-minute exponentially-weighted rate.
    #[serde(rename = "5MinuteRate")]
    FiveMinuteRate,
    /// Fifteen-minute exponentially-weighted rate.
    #[serde(rename = "15MinuteRate")]
    FifteenMinuteRate,
    /// Mean rate since registration.
    #[serde(rename = "meanRate")]
    MeanRate,
}

impl Expansion {
    /// Metric-name suffix appended to the base metric name for this statistic.
    pub(crate) const fn suffix(self) -> &'static str {
        match self {
            Expansion::Count => "count",
            Expansion::Max => "max",
            Expansion::Mean => "mean",
            Expansion::Min => "min",
            Expansion::StdDev => "stddev",
            Expansion::Median => "median",
            Expansion::P75 => "p75",
            Expansion::P95 => "p95",
            Expansion::P98 => "p98",
            Expansion::P99 => "p99",
            Expansion::P999 => "p999",
            Expansion::OneMinuteRate => "1MinuteRate",
            Expansion::FiveMinuteRate => "5MinuteRate",
            Expansion::FifteenMinuteRate => "15MinuteRate",
            Expansion::MeanRate => "meanRate",
        }
    }

    const COUNT: u16 = 15;

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// A selection of [`Expansion`]s to emit for compound metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpansionSet(u16);

impl ExpansionSet {
    /// The selection containing every expansion.
    pub const fn all() -> ExpansionSet {
        ExpansionSet((1 << Expansion::COUNT) - 1)
    }

    /// The empty selection.
    pub const fn empty() -> ExpansionSet {
        ExpansionSet(0)
    }

    /// Returns this selection with one more expansion included.
    #[must_use]
    pub const fn with(self, expansion: Expansion) -> ExpansionSet {
        ExpansionSet(self.0 | expansion.bit())
    }

    /// Builds a selection from a list of expansions.
    pub fn of(expansions: &[Expansion]) -> ExpansionSet {
        expansions.iter().copied().collect()
    }

    /// Returns `true` if the given expansion is selected.
    pub fn contains(self, expansion: Expansion) -> bool {
        self.0 & expansion.bit() != 0
    }
}

impl Default for ExpansionSet {
    fn default() -> Self {
        ExpansionSet::all()
    }
}

impl FromIterator<Expansion> for ExpansionSet {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Expansion>,
    {
        iter.into_iter().fold(ExpansionSet::empty(), ExpansionSet::with)
    }
}

impl<'de> Deserialize<'de> for ExpansionSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let expansions = Vec::<Expansion>::deserialize(deserializer)?;
        Ok(expansions.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{Expansion, ExpansionSet};

    #[test]
    fn membership() {
        let selected = ExpansionSet::of(&[Expansion::Count, Expansion::P95]);
        assert!(selected.contains(Expansion::Count));
        assert!(selected.contains(Expansion::P95));
        assert!(!selected.contains(Expansion::Median));

        assert!(ExpansionSet::all().contains(Expansion::MeanRate));
        assert!(!ExpansionSet::empty().contains(Expansion::Count));
    }

    #[test]
    fn deserializes_from_suffix_names() {
        let selected: ExpansionSet =
            serde_json::from_str(r#"["count", "p999", "1MinuteRate"]"#).unwrap();
        assert_eq!(
            selected,
            ExpansionSet::of(&[Expansion::Count, Expansion::P999, Expansion::OneMinuteRate])
        );
    }
}
