//! Ordered, duplicate-free queue of links awaiting a visit.

use crate::link::Link;
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

/// Errors surfaced by [`LinkQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// `pop` was called on an empty queue.
    #[error("link queue is empty")]
    Empty,
}

/// Crawl frontier keyed by normalized href.
///
/// Never holds two links with the same href. Adding a known href is a silent
/// no-op, so callers can feed whole pages of links without pre-filtering.
#[derive(Debug, Clone, Default)]
pub struct LinkQueue {
    queue: VecDeque<Link>,
    seen: HashSet<String>,
}

impl LinkQueue {
    /// Constructs an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a queue holding only `root`.
    pub fn seeded(root: Link) -> Self {
        let mut queue = Self::new();
        queue.add(root);
        queue
    }

    /// Number of queued links.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// True when a link with the same href is queued.
    pub fn contains(&self, link: &Link) -> bool {
        self.seen.contains(link.href())
    }

    /// Appends `link` unless its href is already queued. Returns whether it was added.
    pub fn add(&mut self, link: Link) -> bool {
        if !self.seen.insert(link.href().to_string()) {
            return false;
        }
        self.queue.push_back(link);
        true
    }

    /// Appends every link in order, skipping duplicates. Returns how many were added.
    pub fn add_all<I>(&mut self, links: I) -> usize
    where
        I: IntoIterator<Item = Link>,
    {
        links
            .into_iter()
            .map(|link| self.add(link))
            .filter(|added| *added)
            .count()
    }

    /// Puts `link` at the head of the queue.
    ///
    /// An href that is already queued is moved to the front instead of being
    /// duplicated.
    pub fn prepend(&mut self, link: Link) {
        if self.seen.contains(link.href()) {
            self.queue.retain(|queued| queued.href() != link.href());
        } else {
            self.seen.insert(link.href().to_string());
        }
        self.queue.push_front(link);
    }

    /// Removes and returns the head of the queue.
    pub fn pop(&mut self) -> Result<Link, QueueError> {
        let link = self.queue.pop_front().ok_or(QueueError::Empty)?;
        self.seen.remove(link.href());
        Ok(link)
    }

    /// Head of the queue without removing it.
    pub fn peek(&self) -> Option<&Link> {
        self.queue.front()
    }

    /// Drops every link for which `keep` returns false.
    pub fn filter<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Link) -> bool,
    {
        let seen = &mut self.seen;
        self.queue.retain(|link| {
            let retained = keep(link);
            if !retained {
                seen.remove(link.href());
            }
            retained
        });
    }

    /// Stable re-sort of the queued links.
    pub fn reorder<F>(&mut self, compare: F)
    where
        F: FnMut(&Link, &Link) -> Ordering,
    {
        self.queue.make_contiguous().sort_by(compare);
    }

    /// Iterates queued links from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.queue.iter()
    }
}

impl Extend<Link> for LinkQueue {
    fn extend<I: IntoIterator<Item = Link>>(&mut self, iter: I) {
        self.add_all(iter);
    }
}

impl FromIterator<Link> for LinkQueue {
    fn from_iter<I: IntoIterator<Item = Link>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.add_all(iter);
        queue
    }
}
