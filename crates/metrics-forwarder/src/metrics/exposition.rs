//! Parser for the Prometheus text exposition format (version 0.0.4).
//!
//! The parser groups series into [`MetricFamily`] values the way the metrics
//! source announces them: `# TYPE` decides the family kind, summary and
//! histogram series (`_sum`, `_count`, `_bucket`, `quantile`) are folded into
//! a single sample per label set. Sample values are kept verbatim, numeric
//! validation happens at encoding time.

use std::collections::HashMap;

use derive_more::Display;
use error_stack::Report;

use super::family::FamilyKind;
use super::family::HistogramSample;
use super::family::Labels;
use super::family::MetricFamily;
use super::family::Sample;
use super::family::ScalarSample;
use super::family::SummarySample;

const QUANTILE_LABEL: &str = "quantile";
const BUCKET_LABEL: &str = "le";

#[derive(Debug, Display)]
#[display("malformed exposition payload at line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl core::error::Error for ParseError {}

/// Which part of a family a series line contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Value,
    Quantile,
    Bucket,
    Sum,
    Count,
}

/// Parse a whole payload. Any malformed line fails the payload.
pub fn parse(text: &str) -> Result<Vec<MetricFamily>, Report<ParseError>> {
    let mut parser = Parser::default();
    for (idx, raw) in text.lines().enumerate() {
        parser
            .feed(raw)
            .map_err(|reason| Report::new(ParseError { line: idx + 1, reason }))?;
    }
    Ok(parser.families)
}

#[derive(Default)]
struct Parser {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
    types: HashMap<String, FamilyKind>,
}

impl Parser {
    fn feed(&mut self, raw: &str) -> Result<(), String> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }
        if let Some(comment) = line.strip_prefix('#') {
            return self.feed_comment(comment);
        }

        let series = parse_series(line)?;
        let (base, role) = self.resolve(&series.name);
        let kind = self.types.get(base).copied().unwrap_or(FamilyKind::Untyped);
        let base = base.to_string();
        let family = self.family_mut(&base, kind);
        append_series(family, role, series)
    }

    fn feed_comment(&mut self, comment: &str) -> Result<(), String> {
        let mut tokens = comment.split_whitespace();
        if tokens.next() != Some("TYPE") {
            // HELP and free-form comments carry nothing we forward
            return Ok(());
        }
        let name = tokens.next().ok_or("TYPE line without metric name")?;
        let hint = tokens.next().ok_or("TYPE line without type")?;
        let kind =
            FamilyKind::from_type_hint(hint).ok_or_else(|| format!("unknown metric type `{hint}`"))?;
        if !is_metric_name(name) {
            return Err(format!("invalid metric name `{name}`"));
        }
        if self.types.insert(name.to_string(), kind).is_some() {
            return Err(format!("duplicate TYPE line for `{name}`"));
        }
        let family = self.family_mut(name, kind);
        if !family.samples.is_empty() && family.kind != kind {
            return Err(format!("TYPE for `{name}` appears after its samples"));
        }
        family.kind = kind;
        Ok(())
    }

    /// Map a series name to the family it belongs to.
    fn resolve<'a>(&self, name: &'a str) -> (&'a str, Role) {
        for (suffix, role) in [("_bucket", Role::Bucket), ("_sum", Role::Sum), ("_count", Role::Count)] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            match (self.types.get(base), role) {
                (Some(FamilyKind::Histogram), _) => return (base, role),
                (Some(FamilyKind::Summary), Role::Sum | Role::Count) => return (base, role),
                _ => {}
            }
        }
        match self.types.get(name) {
            Some(FamilyKind::Summary) => (name, Role::Quantile),
            _ => (name, Role::Value),
        }
    }

    fn family_mut(&mut self, name: &str, kind: FamilyKind) -> &mut MetricFamily {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => {
                self.families.push(MetricFamily::new(name, kind));
                self.index.insert(name.to_string(), self.families.len() - 1);
                self.families.len() - 1
            }
        };
        &mut self.families[idx]
    }
}

fn append_series(family: &mut MetricFamily, role: Role, mut series: Series) -> Result<(), String> {
    match (family.kind, role) {
        (FamilyKind::Summary, Role::Quantile) => {
            let quantile = series
                .labels
                .remove(QUANTILE_LABEL)
                .ok_or_else(|| format!("summary `{}` sample without quantile", family.name))?;
            summary_entry(family, series.labels)
                .quantiles
                .push((quantile, series.value));
        }
        (FamilyKind::Summary, Role::Sum) => summary_entry(family, series.labels).sum = Some(series.value),
        (FamilyKind::Summary, Role::Count) => {
            summary_entry(family, series.labels).count = Some(series.value)
        }
        (FamilyKind::Histogram, Role::Bucket) => {
            let bound = series
                .labels
                .remove(BUCKET_LABEL)
                .ok_or_else(|| format!("histogram `{}` bucket without le", family.name))?;
            histogram_entry(family, series.labels)
                .buckets
                .push((bound, series.value));
        }
        (FamilyKind::Histogram, Role::Sum) => {
            histogram_entry(family, series.labels).sum = Some(series.value)
        }
        (FamilyKind::Histogram, Role::Count) => {
            histogram_entry(family, series.labels).count = Some(series.value)
        }
        (FamilyKind::Histogram, _) => {
            return Err(format!("unexpected series `{}` in histogram", series.name));
        }
        (_, _) => family.samples.push(Sample::Scalar(ScalarSample {
            labels: series.labels,
            value: series.value,
        })),
    }
    Ok(())
}

fn summary_entry(family: &mut MetricFamily, labels: Labels) -> &mut SummarySample {
    let pos = family
        .samples
        .iter()
        .position(|s| matches!(s, Sample::Summary(existing) if existing.labels == labels));
    let pos = pos.unwrap_or_else(|| {
        family.samples.push(Sample::Summary(SummarySample {
            labels,
            ..Default::default()
        }));
        family.samples.len() - 1
    });
    match &mut family.samples[pos] {
        Sample::Summary(summary) => summary,
        _ => unreachable!("position matched a summary sample"),
    }
}

fn histogram_entry(family: &mut MetricFamily, labels: Labels) -> &mut HistogramSample {
    let pos = family
        .samples
        .iter()
        .position(|s| matches!(s, Sample::Histogram(existing) if existing.labels == labels));
    let pos = pos.unwrap_or_else(|| {
        family.samples.push(Sample::Histogram(HistogramSample {
            labels,
            ..Default::default()
        }));
        family.samples.len() - 1
    });
    match &mut family.samples[pos] {
        Sample::Histogram(histogram) => histogram,
        _ => unreachable!("position matched a histogram sample"),
    }
}

/// A single `name{labels} value [timestamp]` line.
#[derive(Debug)]
struct Series {
    name: String,
    labels: Labels,
    value: String,
}

fn parse_series(line: &str) -> Result<Series, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_metric_name(name) {
        return Err(format!("invalid metric name `{name}`"));
    }

    // blanks may separate the name from its label set
    let mut rest = line[name_end..].trim_start();
    let mut labels = Labels::new();
    if rest.starts_with('{') {
        let consumed = parse_labels(rest, &mut labels)?;
        rest = &rest[consumed..];
    }

    let mut tokens = rest.split_whitespace();
    let value = tokens
        .next()
        .ok_or_else(|| format!("series `{name}` without value"))?;
    if let Some(timestamp) = tokens.next() {
        timestamp
            .parse::<i64>()
            .map_err(|_| format!("invalid timestamp `{timestamp}`"))?;
    }
    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected trailing token `{extra}`"));
    }

    Ok(Series {
        name: name.to_string(),
        labels,
        value: value.to_string(),
    })
}

/// Parse `{a="b",...}` at the start of `input`, returning the consumed byte length.
fn parse_labels(input: &str, labels: &mut Labels) -> Result<usize, String> {
    let mut chars = input.char_indices().peekable();
    chars.next(); // '{'

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        match chars.peek() {
            Some((idx, '}')) => return Ok(idx + 1),
            Some(_) => {}
            None => return Err("unterminated label set".into()),
        }

        let mut name = String::new();
        while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_') {
            name.push(c);
        }
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(format!("invalid label name `{name}`"));
        }

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next().map(|(_, c)| c) != Some('=') {
            return Err(format!("expected `=` after label `{name}`"));
        }
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next().map(|(_, c)| c) != Some('"') {
            return Err(format!("expected quoted value for label `{name}`"));
        }

        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(format!("unterminated value for label `{name}`")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(format!("unterminated value for label `{name}`")),
            }
        }

        if labels.insert(name.clone(), value).is_some() {
            return Err(format!("duplicate label `{name}`"));
        }

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        match chars.next() {
            Some((_, ',')) => continue,
            Some((idx, '}')) => return Ok(idx + 1),
            _ => return Err("expected `,` or `}` in label set".into()),
        }
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
