//! Module versions and version ranges

use std::cmp::Ordering;
use std::fmt;

/// A dotted version number such as `5.15.2`
#[derive(Debug, Clone, Default, Eq)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let parts = text
            .split('.')
            .map(|p| p.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { parts })
    }

    fn part(&self, idx: usize) -> u32 {
        self.parts.get(idx).copied().unwrap_or(0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.part(i).cmp(&other.part(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&s)
    }
}

/// Half-open version range `[minimum, maximum)`; unset bounds are unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRange {
    pub minimum: Option<Version>,
    pub maximum: Option<Version>,
}

impl VersionRange {
    pub fn new(minimum: Option<Version>, maximum: Option<Version>) -> Self {
        Self { minimum, maximum }
    }

    pub fn is_unbounded(&self) -> bool {
        self.minimum.is_none() && self.maximum.is_none()
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.minimum.as_ref().map_or(true, |min| version >= min)
            && self.maximum.as_ref().map_or(true, |max| version < max)
    }

    /// Intersect with another range
    pub fn narrow(&mut self, other: &VersionRange) {
        if let Some(min) = &other.minimum {
            if self.minimum.as_ref().map_or(true, |m| min > m) {
                self.minimum = Some(min.clone());
            }
        }
        if let Some(max) = &other.maximum {
            if self.maximum.as_ref().map_or(true, |m| max < m) {
                self.maximum = Some(max.clone());
            }
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min = self.minimum.as_ref().map(|v| v.to_string()).unwrap_or_default();
        let max = self.maximum.as_ref().map(|v| v.to_string()).unwrap_or_default();
        write!(f, "[{}, {})", min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn compares_with_implicit_zeros() {
        assert_eq!(v("5.0"), v("5"));
        assert!(v("5.15.2") > v("5.9"));
        assert!(Version::parse("5.x").is_none());
    }

    #[test]
    fn narrowing_intersects() {
        let mut range = VersionRange::new(Some(v("1.0")), Some(v("3.0")));
        range.narrow(&VersionRange::new(Some(v("1.5")), None));
        range.narrow(&VersionRange::new(Some(v("1.2")), Some(v("2.0"))));
        assert_eq!(range, VersionRange::new(Some(v("1.5")), Some(v("2.0"))));
        assert!(range.contains(&v("1.9.9")));
        assert!(!range.contains(&v("2.0")));
        assert_eq!(range.to_string(), "[1.5, 2)");
    }
}
