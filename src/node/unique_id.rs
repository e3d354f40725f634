//! Hierarchical unique node identifiers.

use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// One segment of a [`UniqueId`]: a type tag plus a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    segment_type: String,
    value: String,
}

impl Segment {
    pub fn new(segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        Segment {
            segment_type: segment_type.into(),
            value: value.into(),
        }
    }

    pub fn segment_type(&self) -> &str {
        &self.segment_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Ordered sequence of segments identifying one node, stable across a
/// single discovery pass.
///
/// Renders as `[type:value]/[type:value]` and parses back losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueId {
    segments: Vec<Segment>,
}

impl UniqueId {
    /// A root id with a single segment.
    pub fn root(segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        UniqueId {
            segments: vec![Segment::new(segment_type, value)],
        }
    }

    /// A new id with one more segment appended.
    pub fn append(&self, segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::new(segment_type, value));
        UniqueId { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last_segment(&self) -> &Segment {
        self.segments.last().expect("unique id is never empty")
    }

    pub fn is_prefix_of(&self, other: &UniqueId) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            write!(f, "[{}:{}]", segment.segment_type, segment.value)?;
        }
        Ok(())
    }
}

impl FromStr for UniqueId {
    type Err = EngineError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        for raw in input.split('/') {
            let inner = raw
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| EngineError::MalformedUniqueId(input.to_string()))?;
            let (segment_type, value) = inner
                .split_once(':')
                .ok_or_else(|| EngineError::MalformedUniqueId(input.to_string()))?;
            if segment_type.is_empty() || value.is_empty() {
                return Err(EngineError::MalformedUniqueId(input.to_string()));
            }
            segments.push(Segment::new(segment_type, value));
        }
        if segments.is_empty() {
            return Err(EngineError::MalformedUniqueId(input.to_string()));
        }
        Ok(UniqueId { segments })
    }
}
