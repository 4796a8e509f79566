//! Turns metric family snapshots into carbon 2.0 wire lines.
//!
//! Per family: the name is checked against the include/exclude patterns,
//! then every scalar sample is split into intrinsic and meta tags, its value
//! parsed and the line assembled. All lines of one family share the
//! timestamp handed in by the caller.

use derive_more::Display;
use error_stack::Report;
use once_cell::sync::Lazy;
use regex::Regex;
use regex::RegexSet;

use super::family::MetricFamily;
use super::family::Sample;
use super::family::ScalarSample;

pub mod carbon2;

pub use carbon2::WireLine;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Precompiled, unanchored regular expressions matched as a group.
#[derive(Debug, Clone)]
pub struct PatternList {
    set: RegexSet,
}

impl PatternList {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            set: RegexSet::new(patterns)?,
        })
    }

    pub fn empty() -> Self {
        Self {
            set: RegexSet::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// True if any pattern matches somewhere in `haystack`.
    pub fn matches(&self, haystack: &str) -> bool {
        self.set.is_match(haystack)
    }

    pub fn patterns(&self) -> &[String] {
        self.set.patterns()
    }
}

impl Default for PatternList {
    fn default() -> Self {
        Self::empty()
    }
}

/// Name filtering and tag classification settings.
#[derive(Debug, Clone, Default)]
pub struct EncodingRules {
    pub metrics_included: PatternList,
    pub metrics_excluded: PatternList,
    pub intrinsic_labels: PatternList,
    pub extra_intrinsic_tags: Vec<String>,
    pub extra_meta_tags: Vec<String>,
}

/// Where a label ends up on the wire line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Intrinsic,
    Meta,
}

impl EncodingRules {
    /// A family is emitted when it is included (empty include list means
    /// everything) and not excluded.
    pub fn accepts_family(&self, name: &str) -> bool {
        let included = self.metrics_included.is_empty() || self.metrics_included.matches(name);
        let excluded = !self.metrics_excluded.is_empty() && self.metrics_excluded.matches(name);
        included && !excluded
    }

    pub fn classify_label(&self, name: &str) -> TagClass {
        if !self.intrinsic_labels.is_empty() && self.intrinsic_labels.matches(name) {
            TagClass::Intrinsic
        } else {
            TagClass::Meta
        }
    }
}

/// Replace every run of whitespace with a single underscore.
pub fn sanitize_value(value: &str) -> String {
    WHITESPACE_RUN.replace_all(value, "_").into_owned()
}

#[derive(Debug, Display)]
pub enum EncodeError {
    #[display("sample of `{family}` has non-numeric value `{value}`")]
    InvalidValue { family: String, value: String },
}

impl core::error::Error for EncodeError {}

/// Result of encoding one family.
#[derive(Debug, Default)]
pub struct EncodedFamily {
    pub lines: Vec<WireLine>,
    /// samples dropped because their value did not parse
    pub rejected: Vec<Report<EncodeError>>,
    /// summary/histogram samples that are not forwarded
    pub ignored: usize,
    /// false when the family name did not pass the filters
    pub accepted: bool,
}

/// Encode every supported sample of `family` with the shared `timestamp`
/// (milliseconds since the epoch).
pub fn encode_family(rules: &EncodingRules, family: &MetricFamily, timestamp: i64) -> EncodedFamily {
    let mut encoded = EncodedFamily::default();
    if !rules.accepts_family(&family.name) {
        return encoded;
    }
    encoded.accepted = true;

    for sample in &family.samples {
        let Sample::Scalar(scalar) = sample else {
            tracing::debug!(
                family = %family.name,
                kind = sample.kind_name(),
                "Sample kind is ignored"
            );
            encoded.ignored += 1;
            continue;
        };
        match encode_sample(rules, &family.name, scalar, timestamp) {
            Ok(Some(line)) => encoded.lines.push(line),
            Ok(None) => {}
            Err(report) => encoded.rejected.push(report),
        }
    }
    encoded
}

fn encode_sample(
    rules: &EncodingRules,
    family_name: &str,
    sample: &ScalarSample,
    timestamp: i64,
) -> Result<Option<WireLine>, Report<EncodeError>> {
    let mut intrinsic = rules.extra_intrinsic_tags.clone();
    let mut meta = rules.extra_meta_tags.clone();

    for (name, value) in &sample.labels {
        let tag = format!("{name}={}", sanitize_value(value));
        match rules.classify_label(name) {
            TagClass::Intrinsic => intrinsic.push(tag),
            TagClass::Meta => meta.push(tag),
        }
    }

    let value = sample.parse_value().map_err(|e| {
        Report::new(EncodeError::InvalidValue {
            family: family_name.to_string(),
            value: sample.value.clone(),
        })
        .attach_printable(e.to_string())
    })?;

    intrinsic.push(format!("metric={family_name}"));

    let line = WireLine::new(intrinsic, meta, value, timestamp);
    Ok((!line.is_degenerate()).then_some(line))
}
