//! Paginated album loading behind the album grid.
//!
//! The grid is told exactly as many albums as are loaded. Showing a card
//! near the end of that list requests the next page, with at most one page
//! in flight. Pages arrive through a channel so an iterator may deliver
//! either before `next_n` returns or later from a worker thread; the UI
//! thread picks them up with [`AlbumFeed::poll`].

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use crate::error::FetchError;

/// Album summary as listed by the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub year: Option<u32>,
    pub song_count: u32,
}

/// One delivery from an album iterator.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Item(Album),
    /// No more albums exist.
    End,
    /// The page could not be fetched; albums delivered so far are kept.
    Failed(FetchError),
}

/// Sending half handed to an [`AlbumIterator`] for one page.
///
/// Dropping it is the "done" signal: if fewer albums than requested were
/// delivered by then, the source is treated as exhausted.
#[derive(Debug, Clone)]
pub struct PageSink {
    tx: Sender<PageEvent>,
}

impl PageSink {
    /// Returns false once the feed stopped listening.
    pub fn item(&self, album: Album) -> bool {
        self.tx.send(PageEvent::Item(album)).is_ok()
    }

    pub fn end(self) {
        let _ = self.tx.send(PageEvent::End);
    }

    pub fn fail(self, error: FetchError) {
        let _ = self.tx.send(PageEvent::Failed(error));
    }
}

/// Forward-only source of albums in server order.
pub trait AlbumIterator {
    /// Deliver up to `count` albums to `sink`, each exactly once.
    fn next_n(&mut self, count: usize, sink: PageSink);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Fetching,
    /// Terminal.
    Exhausted,
}

struct PendingPage {
    rx: Receiver<PageEvent>,
    requested: usize,
    delivered: usize,
}

pub struct AlbumFeed {
    iter: Option<Box<dyn AlbumIterator>>,
    loaded: Vec<Album>,
    state: FeedState,
    pending: Option<PendingPage>,
    prefetch_window: usize,
    page_size: usize,
    error: Option<FetchError>,
    retry_delay: Duration,
    /// Prefetch stays off until then after a failed page
    retry_at: Option<Instant>,
}

impl AlbumFeed {
    pub fn new(iter: Option<Box<dyn AlbumIterator>>) -> Self {
        let state = if iter.is_some() {
            FeedState::Idle
        } else {
            FeedState::Exhausted
        };
        Self {
            iter,
            loaded: Vec::new(),
            state,
            pending: None,
            prefetch_window: crate::PREFETCH_WINDOW,
            page_size: crate::PAGE_SIZE,
            error: None,
            retry_delay: crate::PREFETCH_RETRY_DELAY,
            retry_at: None,
        }
    }

    pub fn with_paging(mut self, page_size: usize, prefetch_window: usize) -> Self {
        self.page_size = page_size;
        self.prefetch_window = prefetch_window;
        self
    }

    /// How long scrolling waits before retrying a failed page.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Number of albums the grid may show.
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Album> {
        self.loaded.get(index)
    }

    pub fn albums(&self) -> &[Album] {
        &self.loaded
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn is_fetching(&self) -> bool {
        self.state == FeedState::Fetching
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == FeedState::Exhausted
    }

    /// One-shot notification of the last failed page fetch.
    pub fn take_error(&mut self) -> Option<FetchError> {
        self.error.take()
    }

    /// Request `count` more albums. No-op while a page is in flight or once
    /// the source is exhausted. Returns whether a request was issued.
    pub fn fetch_more(&mut self, count: usize) -> bool {
        if self.state != FeedState::Idle || count == 0 {
            return false;
        }
        let Some(iter) = self.iter.as_mut() else {
            self.state = FeedState::Exhausted;
            return false;
        };

        let (tx, rx) = mpsc::channel();
        self.state = FeedState::Fetching;
        self.pending = Some(PendingPage {
            rx,
            requested: count,
            delivered: 0,
        });
        log::debug!("requesting {} albums after {}", count, self.loaded.len());
        iter.next_n(count, PageSink { tx });

        self.poll();
        true
    }

    /// Apply whatever the iterator delivered so far. Returns the number of
    /// albums appended.
    pub fn poll(&mut self) -> usize {
        let Some(page) = self.pending.as_mut() else {
            return 0;
        };

        let before = self.loaded.len();
        loop {
            match page.rx.try_recv() {
                Ok(PageEvent::Item(album)) => {
                    self.loaded.push(album);
                    page.delivered += 1;
                    if page.delivered == page.requested {
                        self.state = FeedState::Idle;
                        self.pending = None;
                        break;
                    }
                }
                Ok(PageEvent::End) => {
                    self.finish_exhausted();
                    break;
                }
                Ok(PageEvent::Failed(e)) => {
                    log::warn!("album page fetch failed: {}", e);
                    self.error = Some(e);
                    self.retry_at = Some(Instant::now() + self.retry_delay);
                    self.state = FeedState::Idle;
                    self.pending = None;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // short page without an explicit end marker
                    self.finish_exhausted();
                    break;
                }
            }
        }
        self.loaded.len() - before
    }

    /// Prefetch trigger for a card being shown at `index`. Backs off for
    /// the retry delay after a failed page; `fetch_more` itself does not.
    pub fn on_item_shown(&mut self, index: usize) -> bool {
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return false;
        }
        if self.state == FeedState::Idle
            && index.saturating_add(self.prefetch_window) > self.loaded.len()
        {
            return self.fetch_more(self.page_size);
        }
        false
    }

    fn finish_exhausted(&mut self) {
        log::info!("album source exhausted after {} albums", self.loaded.len());
        self.state = FeedState::Exhausted;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;

    fn album(i: usize) -> Album {
        Album {
            id: format!("al-{i}"),
            name: format!("Album {i}"),
            ..Default::default()
        }
    }

    /// Delivers synchronously from a fixed list, ending with `End`.
    struct ListIter {
        total: usize,
        next: usize,
        calls: Rc<RefCell<Vec<usize>>>,
        fail_on_call: Option<usize>,
    }

    impl ListIter {
        fn new(total: usize) -> (Self, Rc<RefCell<Vec<usize>>>) {
            let calls = Rc::new(RefCell::new(Vec::new()));
            let iter = Self {
                total,
                next: 0,
                calls: calls.clone(),
                fail_on_call: None,
            };
            (iter, calls)
        }
    }

    impl AlbumIterator for ListIter {
        fn next_n(&mut self, count: usize, sink: PageSink) {
            self.calls.borrow_mut().push(count);
            if self.fail_on_call == Some(self.calls.borrow().len()) {
                sink.fail(FetchError::Http("connection reset".into()));
                return;
            }
            for _ in 0..count {
                if self.next >= self.total {
                    sink.end();
                    return;
                }
                sink.item(album(self.next));
                self.next += 1;
            }
        }
    }

    /// Hands the sink out so the test decides when albums arrive.
    struct ManualIter {
        sinks: Rc<RefCell<Vec<PageSink>>>,
    }

    impl AlbumIterator for ManualIter {
        fn next_n(&mut self, _count: usize, sink: PageSink) {
            self.sinks.borrow_mut().push(sink);
        }
    }

    #[test]
    fn test_paging_scenario_25_albums() {
        let (iter, calls) = ListIter::new(25);
        let mut feed = AlbumFeed::new(Some(Box::new(iter)));

        assert!(feed.fetch_more(10));
        assert_eq!((feed.len(), feed.state()), (10, FeedState::Idle));

        assert!(feed.fetch_more(10));
        assert_eq!((feed.len(), feed.state()), (20, FeedState::Idle));

        assert!(feed.fetch_more(10));
        assert_eq!(feed.len(), 25);
        assert!(feed.is_exhausted());
        assert!(!feed.is_fetching());

        assert!(!feed.fetch_more(10));
        assert_eq!(feed.len(), 25);
        assert!(feed.is_exhausted());
        assert_eq!(*calls.borrow(), vec![10, 10, 10]);

        let ids: Vec<_> = feed.albums().iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids[0], "al-0");
        assert_eq!(ids[24], "al-24");
    }

    #[test]
    fn test_full_page_grows_by_exactly_n() {
        let (iter, _) = ListIter::new(100);
        let mut feed = AlbumFeed::new(Some(Box::new(iter)));
        feed.fetch_more(7);
        assert_eq!(feed.len(), 7);
        assert!(!feed.is_fetching());
        assert!(!feed.is_exhausted());
    }

    #[test]
    fn test_fetch_while_in_flight_is_noop() {
        let sinks = Rc::new(RefCell::new(Vec::new()));
        let mut feed = AlbumFeed::new(Some(Box::new(ManualIter {
            sinks: sinks.clone(),
        })));

        assert!(feed.fetch_more(3));
        assert!(feed.is_fetching());
        assert!(!feed.fetch_more(3));
        assert_eq!(sinks.borrow().len(), 1);

        // incremental display: each album shows up as it arrives
        let sink = sinks.borrow_mut().pop().unwrap();
        sink.item(album(0));
        assert_eq!(feed.poll(), 1);
        assert!(feed.is_fetching());
        sink.item(album(1));
        sink.item(album(2));
        assert_eq!(feed.poll(), 2);
        assert_eq!(feed.state(), FeedState::Idle);
        assert_eq!(feed.len(), 3);
    }

    #[test]
    fn test_dropped_sink_ends_short_page() {
        let sinks = Rc::new(RefCell::new(Vec::new()));
        let mut feed = AlbumFeed::new(Some(Box::new(ManualIter {
            sinks: sinks.clone(),
        })));
        feed.fetch_more(5);
        let sink = sinks.borrow_mut().pop().unwrap();
        sink.item(album(0));
        drop(sink);
        feed.poll();
        assert_eq!(feed.len(), 1);
        assert!(feed.is_exhausted());
    }

    #[test]
    fn test_extra_items_are_ignored() {
        let sinks = Rc::new(RefCell::new(Vec::new()));
        let mut feed = AlbumFeed::new(Some(Box::new(ManualIter {
            sinks: sinks.clone(),
        })));
        feed.fetch_more(1);
        let sink = sinks.borrow_mut().pop().unwrap();
        sink.item(album(0));
        feed.poll();
        assert!(!sink.item(album(1)));
        feed.poll();
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn test_failure_keeps_loaded_and_allows_retry() {
        let (mut iter, calls) = ListIter::new(50);
        iter.fail_on_call = Some(2);
        let mut feed = AlbumFeed::new(Some(Box::new(iter)));

        feed.fetch_more(10);
        assert!(!feed.fetch_more(0));
        feed.fetch_more(10);
        assert_eq!(feed.len(), 10);
        assert_eq!(feed.state(), FeedState::Idle);
        assert_eq!(
            feed.take_error(),
            Some(FetchError::Http("connection reset".into()))
        );
        assert_eq!(feed.take_error(), None);

        assert!(feed.fetch_more(10));
        assert_eq!(feed.len(), 20);
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn test_prefetch_backs_off_after_failure() {
        let (mut iter, calls) = ListIter::new(50);
        iter.fail_on_call = Some(2);
        let mut feed = AlbumFeed::new(Some(Box::new(iter)))
            .with_paging(10, 10)
            .with_retry_delay(Duration::from_secs(3600));
        feed.fetch_more(10);

        assert!(feed.on_item_shown(5));
        assert!(feed.take_error().is_some());
        // every visible card re-checks on each tick; none may refetch yet
        for _ in 0..20 {
            assert!(!feed.on_item_shown(5));
        }
        assert_eq!(calls.borrow().len(), 2);
        assert_eq!(feed.state(), FeedState::Idle);

        // an explicit request still goes through
        assert!(feed.fetch_more(10));
        assert_eq!(feed.len(), 20);
    }

    #[test]
    fn test_prefetch_retries_once_delay_passed() {
        let (mut iter, calls) = ListIter::new(50);
        iter.fail_on_call = Some(2);
        let mut feed = AlbumFeed::new(Some(Box::new(iter)))
            .with_paging(10, 10)
            .with_retry_delay(Duration::ZERO);
        feed.fetch_more(10);

        assert!(feed.on_item_shown(5));
        assert_eq!(feed.len(), 10);
        assert!(feed.on_item_shown(5));
        assert_eq!(feed.len(), 20);
        assert_eq!(*calls.borrow(), vec![10, 10, 10]);
    }

    #[test]
    fn test_prefetch_with_huge_index() {
        let (iter, calls) = ListIter::new(50);
        let mut feed = AlbumFeed::new(Some(Box::new(iter))).with_paging(10, 10);
        feed.fetch_more(10);
        assert!(feed.on_item_shown(usize::MAX));
        assert_eq!(feed.len(), 20);
        assert_eq!(*calls.borrow(), vec![10, 10]);
    }

    #[test]
    fn test_no_iterator_is_exhausted() {
        let mut feed = AlbumFeed::new(None);
        assert!(feed.is_exhausted());
        assert!(!feed.fetch_more(10));
        assert!(!feed.on_item_shown(0));
    }

    #[test]
    fn test_prefetch_window() {
        let (iter, calls) = ListIter::new(100);
        let mut feed = AlbumFeed::new(Some(Box::new(iter))).with_paging(10, 10);
        feed.fetch_more(36);

        // far from the end
        assert!(!feed.on_item_shown(0));
        assert!(!feed.on_item_shown(26));
        // 27 > 36 - 10
        assert!(feed.on_item_shown(27));
        assert_eq!(feed.len(), 46);
        assert_eq!(*calls.borrow(), vec![36, 10]);
    }

    #[test]
    fn test_prefetch_skipped_while_fetching() {
        let sinks = Rc::new(RefCell::new(Vec::new()));
        let mut feed = AlbumFeed::new(Some(Box::new(ManualIter {
            sinks: sinks.clone(),
        })));
        feed.fetch_more(2);
        assert!(!feed.on_item_shown(0));
        assert_eq!(sinks.borrow().len(), 1);
    }

    /// Delivers from a worker thread, the way a network-backed iterator does.
    struct ThreadedIter {
        next: usize,
        total: usize,
    }

    impl AlbumIterator for ThreadedIter {
        fn next_n(&mut self, count: usize, sink: PageSink) {
            let start = self.next;
            let end = (start + count).min(self.total);
            self.next = end;
            let short = end - start < count;
            thread::spawn(move || {
                for i in start..end {
                    sink.item(album(i));
                }
                if short {
                    sink.end();
                }
            });
        }
    }

    #[test]
    fn test_async_delivery_via_poll() {
        let mut feed = AlbumFeed::new(Some(Box::new(ThreadedIter { next: 0, total: 15 })));
        feed.fetch_more(10);
        while feed.is_fetching() {
            feed.poll();
            thread::yield_now();
        }
        assert_eq!(feed.len(), 10);
        assert_eq!(feed.state(), FeedState::Idle);

        feed.fetch_more(10);
        while feed.is_fetching() {
            feed.poll();
            thread::yield_now();
        }
        assert_eq!(feed.len(), 15);
        assert!(feed.is_exhausted());
    }
}
