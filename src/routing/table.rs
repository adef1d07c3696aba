//! Longest-prefix upstream lookup.
//!
//! # Responsibilities
//! - Parse every upstream flag, failing on the first bad one
//! - Order entries so the most specific prefix is tested first
//! - Answer path lookups without allocation or locking
//!
//! # Design Decisions
//! - Stable sort on descending path length: among equal lengths the
//!   earlier flag wins, so the same flags always route the same way
//! - O(n) prefix scan (upstream lists are short)

use std::slice;

use crate::routing::upstream::{ParseError, Upstream};

/// Immutable, ordered set of upstreams.
#[derive(Debug, Clone, Default)]
pub struct UpstreamTable {
    entries: Vec<Upstream>,
}

impl UpstreamTable {
    /// Parse upstream flags into a table.
    pub fn parse<I, S>(specs: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = specs
            .into_iter()
            .map(|spec| Upstream::parse(spec.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_upstreams(entries))
    }

    /// Build a table from already parsed upstreams.
    pub fn from_upstreams(mut entries: Vec<Upstream>) -> Self {
        // `sort_by_key` is stable, which is what keeps equal-length ties in input order.
        entries.sort_by_key(|u| std::cmp::Reverse(u.path.len()));
        Self { entries }
    }

    /// Find the upstream with the longest path that prefixes `path`.
    pub fn find_match(&self, path: &str) -> Option<&Upstream> {
        self.entries.iter().find(|u| path.starts_with(u.path.as_str()))
    }

    pub fn iter(&self) -> slice::Iter<'_, Upstream> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a UpstreamTable {
    type Item = &'a Upstream;
    type IntoIter = slice::Iter<'a, Upstream>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
