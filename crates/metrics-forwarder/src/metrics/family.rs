//! Snapshot types produced by one poll of the metrics source.

use std::collections::BTreeMap;
use std::num::ParseFloatError;

/// Label name to label value. Keys are unique and iterate in a stable order.
pub type Labels = BTreeMap<String, String>;

/// Kind announced by a `# TYPE` line, `Untyped` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    Counter,
    Gauge,
    Untyped,
    Summary,
    Histogram,
}

impl FamilyKind {
    pub fn from_type_hint(hint: &str) -> Option<Self> {
        match hint {
            "counter" => Some(Self::Counter),
            "gauge" => Some(Self::Gauge),
            "untyped" => Some(Self::Untyped),
            "summary" => Some(Self::Summary),
            "histogram" => Some(Self::Histogram),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Untyped => "untyped",
            Self::Summary => "summary",
            Self::Histogram => "histogram",
        }
    }
}

/// A named group of samples collected in one poll tick.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: FamilyKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, kind: FamilyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            samples: Vec::new(),
        }
    }

    /// Builder style helper, mostly useful when assembling fixtures.
    pub fn with_sample(mut self, sample: impl Into<Sample>) -> Self {
        self.samples.push(sample.into());
        self
    }
}

/// One measurement of a family. Only `Scalar` samples are forwarded.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Scalar(ScalarSample),
    Summary(SummarySample),
    Histogram(HistogramSample),
}

impl Sample {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Sample::Scalar(_) => "scalar",
            Sample::Summary(_) => "summary",
            Sample::Histogram(_) => "histogram",
        }
    }
}

/// Counter, gauge or untyped sample. The value keeps its textual form and is
/// only parsed when the sample is encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSample {
    pub labels: Labels,
    pub value: String,
}

impl ScalarSample {
    pub fn new<I, K, V>(labels: I, value: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            value: value.into(),
        }
    }

    pub fn parse_value(&self) -> Result<f64, ParseFloatError> {
        self.value.trim().parse::<f64>()
    }
}

impl From<ScalarSample> for Sample {
    fn from(sample: ScalarSample) -> Self {
        Sample::Scalar(sample)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummarySample {
    pub labels: Labels,
    /// `(quantile, value)` in exposition order
    pub quantiles: Vec<(String, String)>,
    pub sum: Option<String>,
    pub count: Option<String>,
}

impl From<SummarySample> for Sample {
    fn from(sample: SummarySample) -> Self {
        Sample::Summary(sample)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramSample {
    pub labels: Labels,
    /// `(upper bound, cumulative count)` in exposition order
    pub buckets: Vec<(String, String)>,
    pub sum: Option<String>,
    pub count: Option<String>,
}

impl From<HistogramSample> for Sample {
    fn from(sample: HistogramSample) -> Self {
        Sample::Histogram(sample)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn scalar_value_is_parsed_lazily() {
        let good = ScalarSample::new([("a", "b")], "1e3");
        assert_eq!(good.parse_value().expect("should parse"), 1000.0);

        let bad = ScalarSample::new([("a", "b")], "NaNtext");
        assert!(bad.parse_value().is_err());
    }

    #[test]
    fn unknown_type_hint_is_rejected() {
        assert_eq!(FamilyKind::from_type_hint("summary"), Some(FamilyKind::Summary));
        assert!(FamilyKind::from_type_hint("gaugehistogram").is_none());
    }
}
