//! Asynchronous album thumbnails for grid cards.
//!
//! Each request runs on its own worker thread; results come back over a
//! channel that the UI thread drains. Cancellation is cooperative and only
//! checked when a result is delivered: a cancelled result is dropped.

use image::RgbaImage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use crate::error::ThumbnailError;

/// Marks an in-flight fetch's result as discardable.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Fetches album thumbnails. Called concurrently for distinct ids.
pub trait ThumbnailProvider: Send + Sync {
    fn fetch_thumbnail(&self, album_id: &str) -> Result<RgbaImage, ThumbnailError>;
}

struct Delivery {
    slot: usize,
    album_id: String,
    token: CancelToken,
    result: Result<Arc<RgbaImage>, ThumbnailError>,
}

/// Small in-memory cache; the oldest entry goes first.
struct MemoryCache {
    map: HashMap<String, Arc<RgbaImage>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl MemoryCache {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, id: &str) -> Option<Arc<RgbaImage>> {
        self.map.get(id).cloned()
    }

    fn insert(&mut self, id: &str, img: Arc<RgbaImage>) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(id.to_string(), img).is_none() {
            self.order.push_back(id.to_string());
        }
        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.map.remove(&old);
                }
                None => break,
            }
        }
    }
}

pub struct ThumbnailLoader {
    provider: Arc<dyn ThumbnailProvider>,
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
    cache: MemoryCache,
    in_flight: usize,
}

impl ThumbnailLoader {
    pub fn new(provider: Arc<dyn ThumbnailProvider>, cache_entries: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            provider,
            tx,
            rx,
            cache: MemoryCache::new(cache_entries),
            in_flight: 0,
        }
    }

    /// Start fetching the thumbnail of `album_id` for card `slot`. The
    /// returned token cancels delivery of this one request.
    pub fn request(&mut self, slot: usize, album_id: &str) -> CancelToken {
        let token = CancelToken::new();

        if let Some(img) = self.cache.get(album_id) {
            log::debug!("thumbnail cache hit for {}", album_id);
            self.in_flight += 1;
            let _ = self.tx.send(Delivery {
                slot,
                album_id: album_id.to_string(),
                token: token.clone(),
                result: Ok(img),
            });
            return token;
        }

        let provider = self.provider.clone();
        let tx = self.tx.clone();
        let id = album_id.to_string();
        let worker_token = token.clone();
        let spawned = thread::Builder::new()
            .name("thumbnail".into())
            .spawn(move || {
                let result = provider.fetch_thumbnail(&id).map(Arc::new);
                let _ = tx.send(Delivery {
                    slot,
                    album_id: id,
                    token: worker_token,
                    result,
                });
            });

        match spawned {
            Ok(_) => self.in_flight += 1,
            Err(e) => log::warn!("could not start thumbnail fetch for {}: {}", album_id, e),
        }
        token
    }

    /// Deliver finished fetches on the calling (UI) thread. `apply` gets
    /// `(slot, album_id, image)` for every result that was not cancelled.
    /// Returns how many were applied.
    pub fn drain(&mut self, mut apply: impl FnMut(usize, &str, Arc<RgbaImage>)) -> usize {
        let mut applied = 0;
        while let Ok(d) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match d.result {
                Ok(img) => {
                    self.cache.insert(&d.album_id, img.clone());
                    if d.token.is_cancelled() {
                        log::debug!("dropping cancelled thumbnail for {}", d.album_id);
                        continue;
                    }
                    apply(d.slot, &d.album_id, img);
                    applied += 1;
                }
                Err(e) if !d.token.is_cancelled() => {
                    log::warn!("thumbnail for {} failed: {}", d.album_id, e);
                }
                Err(_) => {}
            }
        }
        applied
    }

    /// Requests whose result has not been drained yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}
