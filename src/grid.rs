//! Virtualized album grid: a fixed pool of card slots reused for whichever
//! albums are scrolled into view.

use image::RgbaImage;
use std::sync::Arc;

use crate::error::FetchError;
use crate::feed::{Album, AlbumFeed};
use crate::thumbnails::{CancelToken, ThumbnailLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// Display slot of one album card. Owns the cancel token of its pending
/// thumbnail fetch.
#[derive(Debug, Default)]
pub struct CardSlot {
    album: Option<Album>,
    cancel: Option<CancelToken>,
    image: Option<Arc<RgbaImage>>,
}

impl CardSlot {
    pub fn album(&self) -> Option<&Album> {
        self.album.as_ref()
    }

    pub fn album_id(&self) -> Option<&str> {
        self.album.as_ref().map(|a| a.id.as_str())
    }

    /// `None` means the placeholder is shown.
    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        self.image.as_ref()
    }

    fn unbind(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.album = None;
        self.image = None;
    }
}

pub struct AlbumGrid {
    feed: AlbumFeed,
    thumbnails: ThumbnailLoader,
    slots: Vec<CardSlot>,
}

impl AlbumGrid {
    /// Creates the grid and requests the first `initial_fetch` albums.
    pub fn new(feed: AlbumFeed, thumbnails: ThumbnailLoader, initial_fetch: usize) -> Self {
        let mut grid = Self {
            feed,
            thumbnails,
            slots: Vec::new(),
        };
        grid.feed.fetch_more(initial_fetch);
        grid
    }

    /// How many items the view may ask for.
    pub fn item_count(&self) -> usize {
        self.feed.len()
    }

    pub fn album(&self, index: usize) -> Option<&Album> {
        self.feed.get(index)
    }

    pub fn feed(&self) -> &AlbumFeed {
        &self.feed
    }

    pub fn create_card(&mut self) -> SlotId {
        self.slots.push(CardSlot::default());
        SlotId(self.slots.len() - 1)
    }

    pub fn card(&self, slot: SlotId) -> Option<&CardSlot> {
        self.slots.get(slot.0)
    }

    /// Show album `index` in `slot`. Rebinding to a different album cancels
    /// the slot's previous thumbnail fetch, resets it to the placeholder and
    /// starts a new fetch. Returns whether the slot was rebound.
    pub fn update_card(&mut self, slot: SlotId, index: usize) -> bool {
        let Some(album) = self.feed.get(index) else {
            return false;
        };
        let Some(card) = self.slots.get_mut(slot.0) else {
            return false;
        };

        let rebound = card.album_id() != Some(album.id.as_str());
        if rebound {
            card.unbind();
            card.cancel = Some(self.thumbnails.request(slot.0, &album.id));
            card.album = Some(album.clone());
        }

        self.feed.on_item_shown(index);
        rebound
    }

    /// The card is destroyed or no longer shows anything.
    pub fn release_card(&mut self, slot: SlotId) {
        if let Some(card) = self.slots.get_mut(slot.0) {
            card.unbind();
        }
    }

    /// Album to play when the card is activated.
    pub fn activate_card(&self, slot: SlotId) -> Option<&str> {
        self.card(slot).and_then(CardSlot::album_id)
    }

    /// Run on the UI thread: pick up delivered albums and thumbnails.
    /// Returns the slots whose image changed and need a redraw.
    pub fn pump(&mut self) -> Vec<SlotId> {
        self.feed.poll();

        let slots = &mut self.slots;
        let mut refreshed = Vec::new();
        self.thumbnails.drain(|slot, album_id, img| {
            if let Some(card) = slots.get_mut(slot) {
                // token check already passed; this guards slots rebound
                // without going through update_card
                if card.album_id() == Some(album_id) {
                    card.image = Some(img);
                    refreshed.push(SlotId(slot));
                }
            }
        });
        refreshed
    }

    /// One-shot notification of a failed page fetch, for a toast.
    pub fn take_error(&mut self) -> Option<FetchError> {
        self.feed.take_error()
    }

    pub fn thumbnails_in_flight(&self) -> usize {
        self.thumbnails.in_flight()
    }
}

impl Drop for AlbumGrid {
    fn drop(&mut self) {
        for card in &mut self.slots {
            card.unbind();
        }
    }
}
