// Credvault: Keyset pagination
//
// Lazily walks a large result set page by page. Each page is fetched with
// the key of the last item yielded, so nothing is snapshotted in memory and
// a walk can be resumed later from `cursor()`.

use std::collections::VecDeque;

use super::StoreError;

type FetchPage<'a, K, T> =
    Box<dyn FnMut(Option<&K>, usize) -> Result<Vec<(K, T)>, StoreError> + Send + 'a>;

/// Lazy iterator over `(cursor key, item)` pages.
pub struct Paginated<'a, K, T> {
    fetch: FetchPage<'a, K, T>,
    cursor: Option<K>,
    buffer: VecDeque<(K, T)>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, K, T> Paginated<'a, K, T> {
    /// `fetch(after, limit)` must return at most `limit` items whose keys
    /// sort strictly after `after`, in key order.
    pub fn new<F>(page_size: usize, after: Option<K>, fetch: F) -> Self
    where
        F: FnMut(Option<&K>, usize) -> Result<Vec<(K, T)>, StoreError> + Send + 'a,
    {
        Self {
            fetch: Box::new(fetch),
            cursor: after,
            buffer: VecDeque::new(),
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    /// Key of the last item yielded; pass it back to resume after it.
    pub fn cursor(&self) -> Option<&K> {
        self.cursor.as_ref()
    }
}

impl<K, T> Iterator for Paginated<'_, K, T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            match (self.fetch)(self.cursor.as_ref(), self.page_size) {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let (key, item) = self.buffer.pop_front()?;
        self.cursor = Some(key);
        Some(Ok(item))
    }
}
