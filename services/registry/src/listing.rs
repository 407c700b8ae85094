//! Paginated listings of repositories and tags

use std::future::Future;

use serde::Serialize;

use crate::error::RegistryResult;
use crate::reference::{RepoName, Tag};

/// One page of an ascending listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Entries, ascending and unique.
    pub items: Vec<T>,
    /// Cursor for the following page, when more entries may exist.
    pub next: Option<T>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next: None,
        }
    }
}

impl<T: Ord + Clone> Page<T> {
    /// Select up to `limit` entries strictly after `from` from `entries`.
    ///
    /// `entries` need not be sorted or unique.
    pub fn select<I>(entries: I, from: Option<&T>, limit: usize) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut items: Vec<T> = entries
            .into_iter()
            .filter(|item| from.is_none_or(|from| item > from))
            .collect();
        items.sort();
        items.dedup();

        let truncated = items.len() > limit;
        items.truncate(limit);
        let next = if truncated { items.last().cloned() } else { None };
        Self { items, next }
    }

    /// Merge a page from each of two sources into one page of at most `limit`.
    ///
    /// Both sources must have been asked for `limit` entries after the same
    /// cursor.
    pub fn merge(origin: Page<T>, cache: Page<T>, limit: usize) -> Self {
        let more = origin.next.is_some() || cache.next.is_some();

        let mut items = Vec::with_capacity(origin.items.len() + cache.items.len());
        let mut left = origin.items.into_iter().peekable();
        let mut right = cache.items.into_iter().peekable();
        loop {
            let item = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) if l < r => left.next(),
                (Some(l), Some(r)) if l > r => right.next(),
                (Some(_), Some(_)) => {
                    right.next();
                    left.next()
                }
                (Some(_), None) => left.next(),
                (None, Some(_)) => right.next(),
                (None, None) => break,
            };
            if let Some(item) = item {
                if items.last() != Some(&item) {
                    items.push(item);
                }
            }
        }

        let truncated = items.len() > limit;
        items.truncate(limit);
        let next = if truncated || more {
            items.last().cloned()
        } else {
            None
        };
        Self { items, next }
    }
}

/// Fetch a page from two sources concurrently and merge them.
///
/// A failing source contributes nothing.
pub(crate) async fn joined<T, O, C>(origin: O, cache: C, limit: usize) -> Page<T>
where
    T: Ord + Clone,
    O: Future<Output = RegistryResult<Page<T>>>,
    C: Future<Output = RegistryResult<Page<T>>>,
{
    let (origin, cache) = futures::join!(origin, cache);
    let origin = origin.unwrap_or_else(|error| {
        tracing::warn!(%error, "origin listing failed");
        Page::default()
    });
    let cache = cache.unwrap_or_else(|error| {
        tracing::warn!(%error, "cache listing failed");
        Page::default()
    });
    Page::merge(origin, cache, limit)
}

/// A page of repository names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    repositories: Vec<RepoName>,
    #[serde(skip)]
    next: Option<RepoName>,
}

impl Catalog {
    /// The repositories on this page.
    pub fn repositories(&self) -> &[RepoName] {
        &self.repositories
    }

    /// Cursor for the next page.
    pub fn next(&self) -> Option<&RepoName> {
        self.next.as_ref()
    }

    /// The underlying page.
    pub fn into_page(self) -> Page<RepoName> {
        Page {
            items: self.repositories,
            next: self.next,
        }
    }
}

impl From<Page<RepoName>> for Catalog {
    fn from(page: Page<RepoName>) -> Self {
        Self {
            repositories: page.items,
            next: page.next,
        }
    }
}

/// A page of tags of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tags {
    name: RepoName,
    tags: Vec<Tag>,
    #[serde(skip)]
    next: Option<Tag>,
}

impl Tags {
    /// Tags of `name` from a page.
    pub fn new(name: RepoName, page: Page<Tag>) -> Self {
        Self {
            name,
            tags: page.items,
            next: page.next,
        }
    }

    /// The repository.
    pub fn name(&self) -> &RepoName {
        &self.name
    }

    /// The tags on this page.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Cursor for the next page.
    pub fn next(&self) -> Option<&Tag> {
        self.next.as_ref()
    }

    /// The underlying page.
    pub fn into_page(self) -> Page<Tag> {
        Page {
            items: self.tags,
            next: self.next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    fn page(items: &[&str], next: Option<&str>) -> Page<String> {
        Page {
            items: items.iter().map(|s| s.to_string()).collect(),
            next: next.map(str::to_owned),
        }
    }

    #[test]
    fn select_sorts_and_pages() {
        let entries = ["d", "b", "a", "c", "b"].map(String::from);
        let first = Page::select(entries.clone(), None, 2);
        assert_eq!(first, page(&["a", "b"], Some("b")));

        let second = Page::select(entries.clone(), first.next.as_ref(), 2);
        assert_eq!(second, page(&["c", "d"], None));

        let empty = Page::select(entries, Some(&"d".to_string()), 2);
        assert_eq!(empty, page(&[], None));
    }

    #[test]
    fn merge_dedups() {
        let merged = Page::merge(page(&["a", "b", "c"], None), page(&["b", "d"], None), 10);
        assert_eq!(merged, page(&["a", "b", "c", "d"], None));
    }

    #[test]
    fn merge_truncates_with_cursor() {
        let merged = Page::merge(page(&["a", "c"], None), page(&["b", "d"], None), 3);
        assert_eq!(merged, page(&["a", "b", "c"], Some("c")));
    }

    #[test]
    fn merge_keeps_cursor_of_unfinished_source() {
        let merged = Page::merge(page(&["a", "b"], Some("b")), page(&[], None), 2);
        assert_eq!(merged, page(&["a", "b"], Some("b")));
    }

    #[test]
    fn empty_merge_has_no_cursor() {
        let merged: Page<String> = Page::merge(Page::default(), Page::default(), 5);
        assert_eq!(merged, page(&[], None));
    }

    #[test]
    fn pages_cover_everything_once() {
        let origin = ["a", "c", "e", "g"].map(String::from);
        let cache = ["b", "c", "d", "h"].map(String::from);

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let merged = Page::merge(
                Page::select(origin.clone(), cursor.as_ref(), 2),
                Page::select(cache.clone(), cursor.as_ref(), 2),
                2,
            );
            seen.extend(merged.items);
            match merged.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, ["a", "b", "c", "d", "e", "g", "h"]);
    }

    #[tokio::test]
    async fn failing_source_is_empty() {
        let merged = joined(
            async { Err(RegistryError::UnsupportedOperation("list")) },
            async { Ok(page(&["x"], None)) },
            10,
        )
        .await;
        assert_eq!(merged, page(&["x"], None));
    }

    #[test]
    fn catalog_body() {
        let name = RepoName::new("alpine").unwrap();
        let catalog = Catalog::from(Page {
            items: vec![name.clone()],
            next: Some(name),
        });
        assert_eq!(
            serde_json::to_value(&catalog).unwrap(),
            serde_json::json!({"repositories": ["alpine"]})
        );
    }
}
