//! Resource locators
//!
//! A [`ResourceLocator`] is the addressing primitive used everywhere in the
//! crate: an ordered, immutable path of name segments. Segments are never
//! empty and never contain the `/` separator, so the rendered form
//! (`images/ents/human`) maps one-to-one onto the segment list. The
//! relative names `.` and `..` are not segments either.

use std::fmt;

use crate::error::{ArchiveError, ArchiveResult};

/// Separator used when rendering and parsing locators
pub const SEPARATOR: char = '/';

/// Ordered path of name segments addressing a resource or subtree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceLocator {
    segments: Vec<String>,
}

impl ResourceLocator {
    /// The empty locator (addresses the node it is applied to)
    pub const fn empty() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Build a locator from explicit segments
    ///
    /// Fails with [`ArchiveError::InvalidLocator`] if a segment is empty,
    /// contains the separator or is `.` or `..`.
    pub fn new<I, S>(segments: I) -> ArchiveResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(Into::into)
            .map(|segment: String| {
                if is_valid_segment(&segment) {
                    Ok(segment)
                } else {
                    Err(ArchiveError::InvalidLocator(segment))
                }
            })
            .collect::<ArchiveResult<Vec<_>>>()?;

        Ok(Self { segments })
    }

    /// Parse a `/`-separated path, dropping empty segments
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Locator with a single segment, used for names read from a node
    pub(crate) fn single(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the locator has no segments
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Borrow the segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Iterate over the segments
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.segments.iter()
    }

    /// First segment, if any
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Last segment, if any
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Locator without its first segment
    pub fn rest(&self) -> Self {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// New locator with `other` appended
    pub fn append(&self, other: &Self) -> Self {
        let mut segments = Vec::with_capacity(self.len() + other.len());
        segments.extend_from_slice(&self.segments);
        segments.extend_from_slice(&other.segments);
        Self { segments }
    }

    /// New locator with `prefix` in front of this one
    pub fn prepend(&self, prefix: &Self) -> Self {
        prefix.append(self)
    }

    /// New locator with a single name appended
    pub fn join(&self, name: &str) -> ArchiveResult<Self> {
        Ok(self.append(&Self::new([name])?))
    }

    /// Whether `prefix` matches the leading segments of this locator
    pub fn starts_with(&self, prefix: &Self) -> bool {
        if self.len() < prefix.len() {
            return false;
        }

        self.segments[..prefix.len()] == prefix.segments[..]
    }

    /// Whether this locator matches the leading segments of `other`
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.starts_with(self)
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl From<&str> for ResourceLocator {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for ResourceLocator {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl<'a> IntoIterator for &'a ResourceLocator {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

/// Sort locators by rendered path and drop duplicates
pub(crate) fn sorted_unique<I>(locators: I) -> Vec<ResourceLocator>
where
    I: IntoIterator<Item = ResourceLocator>,
{
    locators
        .into_iter()
        .map(|locator| (locator.to_string(), locator))
        .collect::<std::collections::BTreeMap<_, _>>()
        .into_values()
        .collect()
}

/// Whether `name` can stand as one locator segment
pub(crate) fn is_valid_segment(name: &str) -> bool {
    !name.is_empty() && !name.contains(SEPARATOR) && name != "." && name != ".."
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drops_empty_segments() {
        let locator = ResourceLocator::parse("/images//ents/human/");
        assert_eq!(locator.segments(), ["images", "ents", "human"]);
        assert_eq!(locator.to_string(), "images/ents/human");
    }

    #[test]
    fn test_empty_renders_empty() {
        assert_eq!(ResourceLocator::empty().to_string(), "");
        assert!(ResourceLocator::parse("").is_empty());
    }

    #[test]
    fn test_new_rejects_bad_segments() {
        assert!(matches!(
            ResourceLocator::new(["a", ""]),
            Err(ArchiveError::InvalidLocator(_))
        ));
        assert!(matches!(
            ResourceLocator::new(["a/b"]),
            Err(ArchiveError::InvalidLocator(_))
        ));
        for relative in [".", ".."] {
            assert!(matches!(
                ResourceLocator::new(["a", relative]),
                Err(ArchiveError::InvalidLocator(_))
            ));
        }
        assert!(ResourceLocator::new(["..a", "b.", ".hidden"]).is_ok());
    }

    #[test]
    fn test_append_and_prepend() {
        let a = ResourceLocator::parse("a/b");
        let c = ResourceLocator::parse("c");
        assert_eq!(a.append(&c).to_string(), "a/b/c");
        assert_eq!(a.prepend(&c).to_string(), "c/a/b");
        // Originals untouched
        assert_eq!(a.to_string(), "a/b");
    }

    #[test]
    fn test_prefix_checks() {
        let long = ResourceLocator::parse("a/b/c");
        let short = ResourceLocator::parse("a/b");
        let other = ResourceLocator::parse("a/x");

        assert!(long.starts_with(&short));
        assert!(short.is_prefix_of(&long));
        assert!(!short.starts_with(&long));
        assert!(!long.is_prefix_of(&short));
        assert!(!long.starts_with(&other));
        assert!(long.starts_with(&ResourceLocator::empty()));
    }

    #[test]
    fn test_equality_is_segmentwise() {
        assert_eq!(
            ResourceLocator::new(["a", "b"]).unwrap(),
            ResourceLocator::parse("a/b")
        );
        assert_ne!(ResourceLocator::parse("a/b"), ResourceLocator::parse("a"));
    }

    #[test]
    fn test_sorted_unique_orders_by_rendered_path() {
        let sorted = sorted_unique([
            ResourceLocator::parse("a/b"),
            ResourceLocator::parse("a-b"),
            ResourceLocator::parse("a/b"),
            ResourceLocator::parse("A"),
        ]);
        let rendered: Vec<_> = sorted.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["A", "a-b", "a/b"]);
    }
}
