use std::fmt;

/// One encoded carbon 2.0 line:
/// `<intrinsic tags>  <meta tags> <value> <timestamp>`.
///
/// The meta block and the double space in front of it are left out when
/// there are no meta tags.
#[derive(Debug, Clone, PartialEq)]
pub struct WireLine {
    intrinsic: Vec<String>,
    meta: Vec<String>,
    value: f64,
    timestamp: i64,
}

impl WireLine {
    pub fn new(intrinsic: Vec<String>, meta: Vec<String>, value: f64, timestamp: i64) -> Self {
        Self {
            intrinsic,
            meta,
            value,
            timestamp,
        }
    }

    pub fn intrinsic_tags(&self) -> &[String] {
        &self.intrinsic
    }

    pub fn meta_tags(&self) -> &[String] {
        &self.meta
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// True when the line would carry no tag content at all.
    pub fn is_degenerate(&self) -> bool {
        let has_content = |tags: &[String]| {
            tags.iter().any(|tag| {
                let value = tag.split_once('=').map_or(tag.as_str(), |(_, v)| v);
                !value.trim().is_empty()
            })
        };
        !has_content(&self.intrinsic) && !has_content(&self.meta)
    }
}

impl fmt::Display for WireLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.intrinsic.join(" "))?;
        if !self.meta.is_empty() {
            write!(f, "  {}", self.meta.join(" "))?;
        }
        write!(f, " {:.6} {}", self.value, self.timestamp)
    }
}
