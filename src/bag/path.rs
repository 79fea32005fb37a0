//! Field paths
//!
//! Dot/index addressed paths into a config bag, e.g. `criteria.0.threshold`.

use std::fmt;
use std::str::FromStr;

use super::FieldError;

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed field path. The empty path addresses the whole bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The root of the bag
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path. Purely numeric segments are list indices.
    pub fn parse(raw: &str) -> Result<Self, FieldError> {
        if raw.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(FieldError::InvalidPath {
                    path: raw.to_string(),
                    reason: "empty segment".to_string(),
                });
            }
            match part.parse::<usize>() {
                Ok(idx) => segments.push(Segment::Index(idx)),
                Err(_) => segments.push(Segment::Key(part.to_string())),
            }
        }

        Ok(Self { segments })
    }

    /// Path to a top-level field
    pub fn field(name: &str) -> Self {
        Self {
            segments: vec![Segment::Key(name.to_string())],
        }
    }

    /// Extend with a key
    pub fn key(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Key(name.to_string()));
        next
    }

    /// Extend with a list index
    pub fn index(&self, idx: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Index(idx));
        next
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Key(k) => f.write_str(k)?,
                Segment::Index(idx) => write!(f, "{}", idx)?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_segments() {
        let path = FieldPath::parse("criteria.0.threshold").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("criteria".to_string()),
                Segment::Index(0),
                Segment::Key("threshold".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "criteria.0.threshold");
    }

    #[test]
    fn test_empty_is_root() {
        assert!(FieldPath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_empty_segment_rejected() {
        assert!(matches!(
            FieldPath::parse("a..b"),
            Err(FieldError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_builders() {
        let path = FieldPath::field("profile").index(1).key("capacity");
        assert_eq!(path.to_string(), "profile.1.capacity");
    }
}
