use std::collections::VecDeque;

use crate::types::{MemoryClass, Page};

/// Pages surrendered to the host, direct pages first.
#[derive(Debug, Default)]
pub(crate) struct BalloonPool {
    pages: VecDeque<Page>,
    low: u64,
    high: u64,
}

impl BalloonPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a page to the pool.
    ///
    /// Direct pages are re-populated first, so they go to the head and
    /// non-direct pages to the tail.
    #[allow(clippy::arithmetic_side_effects)]
    pub(crate) fn append(&mut self, page: Page) {
        match page.class {
            MemoryClass::Direct => {
                self.pages.push_front(page);
                self.low += 1;
            }
            MemoryClass::NonDirect => {
                self.pages.push_back(page);
                self.high += 1;
            }
        }
    }

    /// Takes the page at the head of the pool, if any.
    #[allow(clippy::arithmetic_side_effects)]
    pub(crate) fn retrieve(&mut self) -> Option<Page> {
        let page = self.pages.pop_front()?;
        match page.class {
            MemoryClass::Direct => self.low -= 1,
            MemoryClass::NonDirect => self.high -= 1,
        }
        Some(page)
    }

    /// Number of pooled directly addressable pages.
    pub(crate) fn low(&self) -> u64 {
        self.low
    }

    /// Number of pooled non-direct pages.
    pub(crate) fn high(&self) -> u64 {
        self.high
    }

    #[allow(clippy::arithmetic_side_effects)]
    pub(crate) fn len(&self) -> u64 {
        self.low + self.high
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pfn;

    fn direct(pfn: u64) -> Page {
        Page::new(Pfn(pfn), MemoryClass::Direct)
    }

    fn non_direct(pfn: u64) -> Page {
        Page::new(Pfn(pfn), MemoryClass::NonDirect)
    }

    #[test]
    fn direct_pages_are_retrieved_first() {
        let mut pool = BalloonPool::new();
        pool.append(non_direct(100));
        pool.append(direct(1));
        pool.append(non_direct(101));
        pool.append(direct(2));
        assert_eq!(pool.low(), 2);
        assert_eq!(pool.high(), 2);

        let order: Vec<_> = std::iter::from_fn(|| pool.retrieve())
            .map(|p| p.pfn.0)
            .collect();
        assert_eq!(order, vec![2, 1, 100, 101]);
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn retrieve_from_empty_pool() {
        let mut pool = BalloonPool::new();
        assert!(pool.retrieve().is_none());
        assert_eq!(pool.low(), 0);
        assert_eq!(pool.high(), 0);
    }

    #[test]
    fn counters_follow_class() {
        let mut pool = BalloonPool::new();
        for pfn in 0..5 {
            pool.append(direct(pfn));
        }
        pool.append(non_direct(10));
        let _page = pool.retrieve().unwrap();
        assert_eq!(pool.low(), 4);
        assert_eq!(pool.high(), 1);
        assert_eq!(pool.iter().last().map(|p| p.pfn), Some(Pfn(10)));
    }
}
