use gdk::prelude::GdkContextExt;
use gdk_pixbuf::{Colorspace, InterpType, Pixbuf};
use gtk::prelude::*;
use gtk::{
    Align, Application, ApplicationWindow, Box as GtkBox, DrawingArea, FlowBox, FlowBoxChild,
    Image, Label, Orientation, PolicyType, ScrolledWindow, SelectionMode,
};
use image::{DynamicImage, Rgb, RgbaImage};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza::config::Config;
use cadenza::feed::{AlbumFeed, AlbumIterator};
use cadenza::grid::{AlbumGrid, SlotId};
use cadenza::seekbar::{Overlay, SeekKey, SeekRequest, WaveformSeekbar};
use cadenza::subsonic::{SubsonicAlbumIterator, SubsonicClient, SubsonicCovers};
use cadenza::theme::{AccentTheme, Palette};
use cadenza::thumbnails::ThumbnailLoader;
use cadenza::waveform::{WaveformData, WaveformImage};

const CARD_SIZE: i32 = 160;
const TICK: Duration = Duration::from_millis(50);
const NOTICE_TIME: Duration = Duration::from_secs(5);

/// Toast-style message that outlives the tick it was posted on.
struct StatusNotice {
    message: Option<(String, Instant)>,
    lifetime: Duration,
}

impl StatusNotice {
    fn new(lifetime: Duration) -> Self {
        Self {
            message: None,
            lifetime,
        }
    }

    fn post(&mut self, message: String, now: Instant) {
        self.message = Some((message, now + self.lifetime));
    }

    /// The posted message until it expires.
    fn current(&mut self, now: Instant) -> Option<&str> {
        if self.message.as_ref().is_some_and(|(_, until)| now >= *until) {
            self.message = None;
        }
        self.message.as_ref().map(|(m, _)| m.as_str())
    }
}

struct CardWidgets {
    child: FlowBoxChild,
    image: Image,
    slot: SlotId,
}

pub struct MainWindow {
    window: ApplicationWindow,
    seekbar: Rc<RefCell<WaveformSeekbar>>,
    theme: Rc<RefCell<AccentTheme>>,
    accent_from_art: bool,
    waveform_area: DrawingArea,
    grid: Rc<RefCell<AlbumGrid>>,
    cards: Rc<RefCell<Vec<CardWidgets>>>,
    flow: FlowBox,
    scroll: ScrolledWindow,
    status: Label,
}

impl MainWindow {
    pub fn new(
        app: &Application,
        config: &Config,
        palette: Palette,
        client: Arc<SubsonicClient>,
        waveform_file: Option<PathBuf>,
    ) -> Self {
        let window = ApplicationWindow::builder()
            .application(app)
            .title("Cadenza")
            .default_width(960)
            .default_height(720)
            .build();

        let root = GtkBox::new(Orientation::Vertical, 8);
        root.set_margin_start(12);
        root.set_margin_end(12);
        root.set_margin_top(12);
        root.set_margin_bottom(12);

        let (scroll, flow) = Self::create_grid_view();
        root.pack_start(&scroll, true, true, 0);

        let status = Label::new(None);
        status.set_halign(Align::Start);
        root.pack_start(&status, false, false, 0);

        let waveform_area = Self::create_waveform_area();
        root.pack_start(&waveform_area, false, false, 0);
        window.add(&root);

        let seekbar = WaveformSeekbar::new(
            WaveformImage::blank(config.seekbar.width, config.seekbar.height),
            palette,
        )
        .with_keyboard_step(config.seekbar.keyboard_step);

        let iter: Option<Box<dyn AlbumIterator>> = if config.server.url.is_empty() {
            None
        } else {
            Some(Box::new(SubsonicAlbumIterator::new(
                client.clone(),
                &config.grid.list_kind,
            )))
        };
        let feed = AlbumFeed::new(iter)
            .with_paging(config.grid.page_size, config.grid.prefetch_window);
        let covers = SubsonicCovers::new(
            client,
            Config::cover_cache_dir(),
            config.grid.thumbnail_size,
        );
        let thumbnails = ThumbnailLoader::new(
            Arc::new(covers),
            config.grid.thumbnail_memory_entries,
        );
        let grid = AlbumGrid::new(feed, thumbnails, config.grid.initial_fetch);

        let main = Self {
            window,
            seekbar: Rc::new(RefCell::new(seekbar)),
            theme: Rc::new(RefCell::new(AccentTheme::new(palette))),
            accent_from_art: config.theme.accent_from_art,
            waveform_area,
            grid: Rc::new(RefCell::new(grid)),
            cards: Rc::new(RefCell::new(Vec::new())),
            flow,
            scroll,
            status,
        };

        main.connect_seekbar_signals();
        main.connect_grid_signals();
        main.start_update_loop();
        if let Some(path) = waveform_file {
            main.load_waveform(path);
        }
        main
    }

    pub fn show(&self) {
        self.window.show_all();
    }

    fn create_grid_view() -> (ScrolledWindow, FlowBox) {
        let scroll = ScrolledWindow::new(None::<&gtk::Adjustment>, None::<&gtk::Adjustment>);
        scroll.set_policy(PolicyType::Never, PolicyType::Automatic);

        let flow = FlowBox::new();
        flow.set_valign(Align::Start);
        flow.set_homogeneous(true);
        flow.set_max_children_per_line(30);
        flow.set_selection_mode(SelectionMode::None);
        flow.set_activate_on_single_click(true);
        scroll.add(&flow);

        (scroll, flow)
    }

    fn create_waveform_area() -> DrawingArea {
        let area = DrawingArea::new();
        area.set_size_request(280, 48);
        area.set_can_focus(true);
        area.add_events(
            gdk::EventMask::BUTTON_PRESS_MASK
                | gdk::EventMask::POINTER_MOTION_MASK
                | gdk::EventMask::ENTER_NOTIFY_MASK
                | gdk::EventMask::LEAVE_NOTIFY_MASK
                | gdk::EventMask::KEY_PRESS_MASK
                | gdk::EventMask::FOCUS_CHANGE_MASK,
        );
        area
    }

    fn create_card(title: &str, artist: &str) -> (FlowBoxChild, Image) {
        let vbox = GtkBox::new(Orientation::Vertical, 4);

        let image = Image::from_icon_name(Some("media-optical"), gtk::IconSize::Dialog);
        image.set_pixel_size(CARD_SIZE);
        image.set_size_request(CARD_SIZE, CARD_SIZE);
        vbox.pack_start(&image, false, false, 0);

        for (text, class) in [(title, "album-title"), (artist, "album-artist")] {
            let label = Label::new(Some(text));
            label.style_context().add_class(class);
            label.set_ellipsize(gtk::pango::EllipsizeMode::End);
            label.set_max_width_chars(18);
            vbox.pack_start(&label, false, false, 0);
        }

        let child = FlowBoxChild::new();
        child.add(&vbox);
        (child, image)
    }

    fn connect_seekbar_signals(&self) {
        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_draw(move |widget, cr| {
            let w = widget.allocated_width();
            let h = widget.allocated_height();
            if let Ok(bar) = seekbar.try_borrow() {
                if let Some(pixbuf) = pixbuf_from(bar.image().as_image())
                    .and_then(|p| p.scale_simple(w.max(1), h.max(1), InterpType::Nearest))
                {
                    cr.set_source_pixbuf(&pixbuf, 0.0, 0.0);
                    let _ = cr.paint();
                }
                for overlay in [bar.focus_ring(), bar.cursor()] {
                    draw_overlay(cr, overlay);
                }
            }
            glib::Propagation::Proceed
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_size_allocate(move |_, alloc| {
            if let Ok(mut bar) = seekbar.try_borrow_mut() {
                bar.resize(alloc.width() as f64, alloc.height() as f64);
            }
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_enter_notify_event(move |widget, event| {
            seekbar.borrow_mut().pointer_entered(event.position().0);
            widget.queue_draw();
            glib::Propagation::Proceed
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_motion_notify_event(move |widget, event| {
            seekbar.borrow_mut().pointer_moved(event.position().0);
            widget.queue_draw();
            glib::Propagation::Proceed
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_leave_notify_event(move |widget, _| {
            seekbar.borrow_mut().pointer_left();
            widget.queue_draw();
            glib::Propagation::Proceed
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_focus_in_event(move |widget, _| {
            seekbar.borrow_mut().focus_gained();
            widget.queue_draw();
            glib::Propagation::Proceed
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_focus_out_event(move |widget, _| {
            seekbar.borrow_mut().focus_lost();
            widget.queue_draw();
            glib::Propagation::Proceed
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_button_press_event(move |widget, event| {
            widget.grab_focus();
            let request = seekbar.borrow().tapped(event.position().0);
            if let Some(request) = request {
                confirm_seek(&seekbar, request);
            }
            widget.queue_draw();
            glib::Propagation::Proceed
        });

        let seekbar = self.seekbar.clone();
        self.waveform_area.connect_key_press_event(move |widget, event| {
            let key = match event.keyval() {
                k if k == gdk::keys::constants::Left => SeekKey::Left,
                k if k == gdk::keys::constants::Right => SeekKey::Right,
                _ => SeekKey::Other,
            };
            let request = seekbar.borrow_mut().key_pressed(key);
            match request {
                Some(request) => {
                    confirm_seek(&seekbar, request);
                    widget.queue_draw();
                    glib::Propagation::Stop
                }
                None => glib::Propagation::Proceed,
            }
        });
    }

    fn connect_grid_signals(&self) {
        let grid = self.grid.clone();
        let cards = self.cards.clone();
        let seekbar = self.seekbar.clone();
        let theme = self.theme.clone();
        let area = self.waveform_area.clone();
        let accent_from_art = self.accent_from_art;
        self.flow.connect_child_activated(move |_, child| {
            let Ok(index) = usize::try_from(child.index()) else {
                return;
            };
            let Some(slot) = cards.borrow().get(index).map(|c| c.slot) else {
                return;
            };
            let grid = grid.borrow();
            let Some(album_id) = grid.activate_card(slot) else {
                return;
            };
            log::info!("play album {}", album_id);

            let mut bar = seekbar.borrow_mut();
            bar.set_progress(0.0);
            if accent_from_art {
                let art = grid.card(slot).and_then(|c| c.image()).cloned();
                let mut theme = theme.borrow_mut();
                match art {
                    Some(img) => {
                        theme.set_art(&DynamicImage::ImageRgba8((*img).clone()));
                    }
                    None => theme.clear_art(),
                }
                bar.refresh(&*theme);
            }
            area.queue_draw();
        });

        let grid = self.grid.clone();
        let cards = self.cards.clone();
        let scroll = self.scroll.clone();
        self.scroll.vadjustment().connect_value_changed(move |_| {
            update_visible_cards(&scroll, &grid, &cards);
        });

        // layout changes (new cards, window resize) move cards in and out of view
        let grid = self.grid.clone();
        let cards = self.cards.clone();
        let scroll = self.scroll.clone();
        self.scroll.vadjustment().connect_changed(move |_| {
            update_visible_cards(&scroll, &grid, &cards);
        });
    }

    /// UI-thread tick: mirror newly loaded albums into cards, apply finished
    /// thumbnails and surface page fetch errors.
    fn start_update_loop(&self) {
        let grid = self.grid.clone();
        let cards = self.cards.clone();
        let flow = self.flow.clone();
        let scroll = self.scroll.clone();
        let status = self.status.clone();
        let mut notice = StatusNotice::new(NOTICE_TIME);

        glib::timeout_add_local(TICK, move || {
            let Ok(mut g) = grid.try_borrow_mut() else {
                return glib::ControlFlow::Continue;
            };
            let refreshed = g.pump();

            let mut cards_mut = cards.borrow_mut();
            let added = cards_mut.len() < g.item_count();
            while cards_mut.len() < g.item_count() {
                let index = cards_mut.len();
                let Some(album) = g.album(index).cloned() else {
                    break;
                };
                let (child, image) = Self::create_card(&album.name, &album.artist);
                flow.add(&child);
                child.show_all();
                let slot = g.create_card();
                cards_mut.push(CardWidgets { child, image, slot });
            }

            for slot in refreshed {
                let Some(card) = cards_mut.iter().find(|c| c.slot == slot) else {
                    continue;
                };
                if let Some(img) = g.card(slot).and_then(|c| c.image()) {
                    if let Some(pixbuf) = pixbuf_from(img).and_then(|p| {
                        p.scale_simple(CARD_SIZE, CARD_SIZE, InterpType::Bilinear)
                    }) {
                        card.image.set_from_pixbuf(Some(&pixbuf));
                    }
                }
            }

            let now = Instant::now();
            if let Some(e) = g.take_error() {
                notice.post(format!("Could not load more albums: {}", e), now);
            }
            match notice.current(now) {
                Some(message) => status.set_text(message),
                None if g.feed().is_fetching() => status.set_text("Loading albums…"),
                None => status.set_text(&format!("{} albums", g.item_count())),
            }

            drop(cards_mut);
            drop(g);
            // only new cards change visibility here; scrolling is handled by
            // the adjustment signals so a failed page is not retried per tick
            if added {
                update_visible_cards(&scroll, &grid, &cards);
            }
            glib::ControlFlow::Continue
        });
    }

    /// Extract peaks in a background thread and swap the bitmap in when done.
    fn load_waveform(&self, path: PathBuf) {
        let (width, height) = {
            let bar = self.seekbar.borrow();
            (bar.image().width(), bar.image().height())
        };
        let (tx, rx) = std::sync::mpsc::channel::<WaveformData>();

        let seekbar = self.seekbar.clone();
        let area = self.waveform_area.clone();
        glib::timeout_add_local(TICK, move || match rx.try_recv() {
            Ok(data) => {
                seekbar
                    .borrow_mut()
                    .update_image(WaveformImage::from_peaks(&data.peaks, width, height));
                area.queue_draw();
                glib::ControlFlow::Break
            }
            Err(std::sync::mpsc::TryRecvError::Empty) => glib::ControlFlow::Continue,
            Err(_) => glib::ControlFlow::Break,
        });

        std::thread::spawn(move || {
            // ~4 columns per bar keeps the bitmap readable at full width
            if let Some(data) = WaveformData::from_file(&path, (width as usize / 4).max(1)) {
                let _ = tx.send(data);
            }
        });
    }
}

/// Stand-in for the playback engine: accept the seek as-is and report the
/// authoritative position back to the seek bar.
fn confirm_seek(seekbar: &Rc<RefCell<WaveformSeekbar>>, request: SeekRequest) {
    log::info!("seek to {:.1}%", request.ratio * 100.0);
    seekbar.borrow_mut().set_progress(request.ratio);
}

/// Cards inside the viewport count as rendered; cards scrolled away with a
/// thumbnail still pending give up their fetch.
fn update_visible_cards(
    scroll: &ScrolledWindow,
    grid: &Rc<RefCell<AlbumGrid>>,
    cards: &Rc<RefCell<Vec<CardWidgets>>>,
) {
    let (Ok(mut grid), Ok(cards)) = (grid.try_borrow_mut(), cards.try_borrow()) else {
        return;
    };
    let adj = scroll.vadjustment();
    let top = adj.value();
    let bottom = top + adj.page_size();

    for (index, card) in cards.iter().enumerate() {
        let alloc = card.child.allocation();
        let y = alloc.y() as f64;
        let visible = alloc.height() > 1 && y + alloc.height() as f64 >= top && y <= bottom;
        if visible {
            if grid.update_card(card.slot, index) {
                card.image.set_from_icon_name(Some("media-optical"), gtk::IconSize::Dialog);
                card.image.set_pixel_size(CARD_SIZE);
            }
        } else if grid
            .card(card.slot)
            .is_some_and(|c| c.album_id().is_some() && c.image().is_none())
        {
            grid.release_card(card.slot);
        }
    }
}

fn pixbuf_from(img: &RgbaImage) -> Option<Pixbuf> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    if w == 0 || h == 0 {
        return None;
    }
    let bytes = glib::Bytes::from_owned(img.as_raw().clone());
    Some(Pixbuf::from_bytes(&bytes, Colorspace::Rgb, true, 8, w, h, w * 4))
}

fn draw_overlay(cr: &cairo::Context, overlay: &Overlay) {
    if !overlay.visible {
        return;
    }
    let Rgb([r, g, b]) = overlay.color;
    cr.set_source_rgb(r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
    cr.rectangle(overlay.x, overlay.y, overlay.width, overlay.height);
    let _ = cr.fill();
}
