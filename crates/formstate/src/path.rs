//! Field path representation for navigating value, error and meta trees.
//!
//! A field name such as `"items[2].name"` or `"items.2.name"` is parsed once
//! into a sequence of segments. Every component resolves names through
//! [`parse_path`], so the splitting rule is shared: dots separate object keys,
//! brackets (or all-digit dotted segments) address array indices.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single segment in a field path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seg {
    /// Object key access: `{"key": value}`
    Key(String),
    /// Array index access: `[index]`
    Index(usize),
}

impl Seg {
    /// Create a key segment.
    #[inline]
    pub fn key(k: impl Into<String>) -> Self {
        Seg::Key(k.into())
    }

    /// Create an index segment.
    #[inline]
    pub fn index(i: usize) -> Self {
        Seg::Index(i)
    }

    /// Returns true if this is an index segment.
    #[inline]
    pub fn is_index(&self) -> bool {
        matches!(self, Seg::Index(_))
    }

    /// Get the index if this is an index segment.
    #[inline]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Seg::Key(_) => None,
            Seg::Index(i) => Some(*i),
        }
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seg::Key(k) => write!(f, "{}", k),
            Seg::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<String> for Seg {
    fn from(s: String) -> Self {
        Seg::Key(s)
    }
}

impl From<&str> for Seg {
    fn from(s: &str) -> Self {
        Seg::Key(s.to_owned())
    }
}

impl From<usize> for Seg {
    fn from(i: usize) -> Self {
        Seg::Index(i)
    }
}

/// A complete path into a form tree.
///
/// Paths display in canonical field-name form (`items.0.name`), which is
/// also the form handed to resolvers in [`ResolverOptions::names`].
///
/// [`ResolverOptions::names`]: crate::ResolverOptions::names
///
/// # Examples
///
/// ```
/// use formstate::{parse_path, Path};
///
/// let path = Path::root().key("items").index(0).key("name");
/// assert_eq!(path, parse_path("items[0].name"));
/// assert_eq!(path.to_string(), "items.0.name");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Seg>);

impl Path {
    /// Create an empty path (root).
    #[inline]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Create a path from a vector of segments.
    #[inline]
    pub fn from_segments(segments: Vec<Seg>) -> Self {
        Self(segments)
    }

    /// Append a key segment and return self (builder pattern).
    #[inline]
    pub fn key(mut self, k: impl Into<String>) -> Self {
        self.0.push(Seg::Key(k.into()));
        self
    }

    /// Append an index segment and return self (builder pattern).
    #[inline]
    pub fn index(mut self, i: usize) -> Self {
        self.0.push(Seg::Index(i));
        self
    }

    /// Push a segment onto the path (mutating).
    #[inline]
    pub fn push(&mut self, seg: Seg) {
        self.0.push(seg);
    }

    /// Pop the last segment from the path.
    #[inline]
    pub fn pop(&mut self) -> Option<Seg> {
        self.0.pop()
    }

    /// Get the segments of this path.
    #[inline]
    pub fn segments(&self) -> &[Seg] {
        &self.0
    }

    /// Check if this path is empty (root).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the number of segments in this path.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get the last segment.
    #[inline]
    pub fn last(&self) -> Option<&Seg> {
        self.0.last()
    }

    /// Append a segment and return a new path (non-mutating builder).
    #[inline]
    pub fn with_segment(&self, seg: Seg) -> Path {
        let mut result = self.clone();
        result.0.push(seg);
        result
    }

    /// Check if this path is a prefix of another path.
    ///
    /// A path is a prefix of itself.
    #[inline]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Check if this path is a strict ancestor of `other`.
    #[inline]
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.len() < other.len() && self.is_prefix_of(other)
    }

    /// Two paths are related when one is a prefix of the other at a
    /// segment boundary (`a.b` and `a.b.c` are related, `a.b` and `a.bc`
    /// are not).
    #[inline]
    pub fn is_related(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// Get the parent path (path without the last segment).
    #[inline]
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            let mut p = self.clone();
            p.pop();
            Some(p)
        }
    }

    /// Iterate over the segments.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Seg> {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

impl FromIterator<Seg> for Path {
    fn from_iter<I: IntoIterator<Item = Seg>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Seg;
    type IntoIter = std::slice::Iter<'a, Seg>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Path {
    type Output = Seg;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        parse_path(s)
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        parse_path(&s)
    }
}

impl From<&String> for Path {
    fn from(s: &String) -> Self {
        parse_path(s)
    }
}

impl From<&Path> for Path {
    fn from(p: &Path) -> Self {
        p.clone()
    }
}

/// Parse a field name into a path.
///
/// Splits on `.`, `[` and `]`; empty pieces are skipped and all-digit pieces
/// become index segments, so `a.b[2].c` and `a.b.2.c` parse identically.
pub fn parse_path(name: &str) -> Path {
    if name.is_empty() {
        return Path::root();
    }
    if is_key(name) && !name.bytes().all(|b| b.is_ascii_digit()) {
        return Path(vec![Seg::Key(name.to_owned())]);
    }

    name.split(['.', '[', ']'])
        .filter(|piece| !piece.is_empty())
        .map(|piece| match piece.parse::<usize>() {
            Ok(i) if piece.bytes().all(|b| b.is_ascii_digit()) => Seg::Index(i),
            _ => Seg::Key(piece.to_owned()),
        })
        .collect()
}

/// True when `name` addresses a plain top-level key and needs no traversal.
#[inline]
pub fn is_key(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', '[', ']'])
}

/// Construct a `Path` from a sequence of segments.
///
/// ```
/// use formstate::path;
///
/// let p = path!("items", 0, "name");
/// assert_eq!(p.to_string(), "items.0.name");
/// ```
#[macro_export]
macro_rules! path {
    () => {
        $crate::Path::root()
    };
    (@seg $seg:expr) => {
        $crate::Seg::from($seg)
    };
    ($($seg:expr),+ $(,)?) => {{
        let mut p = $crate::Path::root();
        $(
            p.push($crate::path!(@seg $seg));
        )+
        p
    }};
}
