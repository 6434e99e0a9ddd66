//! Minimal Subsonic REST client: album listing and cover art.

use serde::Deserialize;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{FetchError, ThumbnailError};
use crate::feed::{Album, AlbumIterator, PageSink};
use crate::thumbnails::ThumbnailProvider;

/// Largest `size` the server accepts for `getAlbumList2`.
const MAX_PAGE: usize = 500;

pub struct SubsonicClient {
    agent: ureq::Agent,
    config: ServerConfig,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "subsonic-response")]
    response: ResponseBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody {
    status: String,
    error: Option<ApiError>,
    album_list2: Option<AlbumList2>,
}

#[derive(Deserialize)]
struct ApiError {
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct AlbumList2 {
    #[serde(default)]
    album: Vec<AlbumId3>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumId3 {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist: String,
    year: Option<u32>,
    #[serde(default)]
    song_count: u32,
}

impl From<AlbumId3> for Album {
    fn from(a: AlbumId3) -> Self {
        Album {
            id: a.id,
            name: a.name,
            artist: a.artist,
            year: a.year,
            song_count: a.song_count,
        }
    }
}

impl SubsonicClient {
    pub fn new(config: ServerConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self { agent, config }
    }

    pub fn ping(&self) -> Result<(), FetchError> {
        let body = self.get_json("ping", &[])?;
        parse_envelope(&body)?;
        log::info!("connected to {} as {}", self.config.url, self.config.username);
        Ok(())
    }

    /// One page of `getAlbumList2` in server order.
    pub fn album_list(&self, kind: &str, size: usize, offset: usize) -> Result<Vec<Album>, FetchError> {
        log::debug!("getAlbumList2 type={} size={} offset={}", kind, size, offset);
        let body = self.get_json(
            "getAlbumList2",
            &[
                ("type", kind.to_string()),
                ("size", size.to_string()),
                ("offset", offset.to_string()),
            ],
        )?;
        parse_album_list(&body)
    }

    /// Raw cover image bytes.
    pub fn cover_art(&self, id: &str, size: u32) -> Result<Vec<u8>, FetchError> {
        let response = self
            .request("getCoverArt", &[("id", id.to_string()), ("size", size.to_string())])
            .call()
            .map_err(http_error)?;

        // errors come back as a regular JSON envelope
        if response.content_type().contains("json") {
            let body = response
                .into_string()
                .map_err(|e| FetchError::Http(e.to_string()))?;
            parse_envelope(&body)?;
            return Err(FetchError::Decode("expected image data".into()));
        }

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(bytes)
    }

    fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<String, FetchError> {
        self.request(endpoint, params)
            .call()
            .map_err(http_error)?
            .into_string()
            .map_err(|e| FetchError::Http(e.to_string()))
    }

    fn request(&self, endpoint: &str, params: &[(&str, String)]) -> ureq::Request {
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let mut req = self.agent.get(&endpoint_url(&self.config.url, endpoint));
        for (k, v) in auth_params(&self.config, &salt).iter().chain(params) {
            req = req.query(k, v);
        }
        req
    }
}

fn endpoint_url(base: &str, endpoint: &str) -> String {
    format!("{}/rest/{}", base.trim_end_matches('/'), endpoint)
}

/// Token auth: `t = md5(password + salt)`; the password itself never leaves.
fn auth_params<'a>(config: &ServerConfig, salt: &str) -> Vec<(&'a str, String)> {
    let token = format!("{:x}", md5::compute(format!("{}{}", config.password, salt)));
    vec![
        ("u", config.username.clone()),
        ("t", token),
        ("s", salt.to_string()),
        ("v", config.api_version.clone()),
        ("c", config.client_name.clone()),
        ("f", "json".to_string()),
    ]
}

fn http_error(e: ureq::Error) -> FetchError {
    match e {
        ureq::Error::Status(code, _) => FetchError::Http(format!("status {}", code)),
        other => FetchError::Http(other.to_string()),
    }
}

fn parse_envelope(body: &str) -> Result<ResponseBody, FetchError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    let response = envelope.response;
    if response.status != "ok" {
        let (code, message) = response
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or((0, "unknown error".to_string()));
        return Err(FetchError::Api { code, message });
    }
    Ok(response)
}

fn parse_album_list(body: &str) -> Result<Vec<Album>, FetchError> {
    let response = parse_envelope(body)?;
    Ok(response
        .album_list2
        .map(|l| l.album.into_iter().map(Album::from).collect())
        .unwrap_or_default())
}

/// Blocking source of one album list page, in server order.
pub trait AlbumPages: Send + Sync {
    fn album_page(&self, kind: &str, size: usize, offset: usize) -> Result<Vec<Album>, FetchError>;
}

impl AlbumPages for SubsonicClient {
    fn album_page(&self, kind: &str, size: usize, offset: usize) -> Result<Vec<Album>, FetchError> {
        self.album_list(kind, size, offset)
    }
}

/// Pages through an album list on a background thread.
pub struct SubsonicAlbumIterator {
    pages: Arc<dyn AlbumPages>,
    kind: String,
    offset: Arc<AtomicUsize>,
}

impl SubsonicAlbumIterator {
    pub fn new(pages: Arc<dyn AlbumPages>, kind: &str) -> Self {
        Self {
            pages,
            kind: kind.to_string(),
            offset: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AlbumIterator for SubsonicAlbumIterator {
    fn next_n(&mut self, count: usize, sink: PageSink) {
        let pages = self.pages.clone();
        let kind = self.kind.clone();
        let offset = self.offset.clone();
        let fallback = sink.clone();

        let spawned = thread::Builder::new()
            .name("album-page".into())
            .spawn(move || {
                let mut remaining = count;
                while remaining > 0 {
                    let size = remaining.min(MAX_PAGE);
                    let start = offset.load(Ordering::Acquire);
                    let albums = match pages.album_page(&kind, size, start) {
                        Ok(albums) => albums,
                        Err(e) => {
                            sink.fail(e);
                            return;
                        }
                    };
                    let got = albums.len();
                    offset.fetch_add(got, Ordering::AcqRel);
                    for album in albums {
                        if !sink.item(album) {
                            return;
                        }
                    }
                    if got < size {
                        sink.end();
                        return;
                    }
                    remaining -= size;
                }
            });

        if let Err(e) = spawned {
            fallback.fail(FetchError::Http(format!("could not start page fetch: {}", e)));
        }
    }
}

/// Cover art through `getCoverArt`, cached on disk per album and size.
pub struct SubsonicCovers {
    client: Arc<SubsonicClient>,
    cache_dir: PathBuf,
    size: u32,
}

impl SubsonicCovers {
    pub fn new(client: Arc<SubsonicClient>, cache_dir: PathBuf, size: u32) -> Self {
        Self {
            client,
            cache_dir,
            size,
        }
    }

    /// Readable part plus a hash of the raw id, so ids that sanitize
    /// alike still get their own file.
    fn cache_path(&self, album_id: &str) -> PathBuf {
        let safe: String = album_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let digest = format!("{:x}", md5::compute(album_id));
        self.cache_dir
            .join(format!("{}-{}-{}", safe, &digest[..8], self.size))
    }
}

impl ThumbnailProvider for SubsonicCovers {
    fn fetch_thumbnail(&self, album_id: &str) -> Result<image::RgbaImage, ThumbnailError> {
        let path = self.cache_path(album_id);
        if let Ok(bytes) = fs::read(&path) {
            match image::load_from_memory(&bytes) {
                Ok(img) => return Ok(img.to_rgba8()),
                Err(e) => {
                    log::warn!("discarding corrupt cover cache {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let bytes = self.client.cover_art(album_id, self.size)?;
        let img = image::load_from_memory(&bytes)?;
        if let Err(e) = fs::create_dir_all(&self.cache_dir).and_then(|_| fs::write(&path, &bytes)) {
            log::warn!("could not cache cover {}: {}", path.display(), e);
        }
        Ok(img.to_rgba8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{AlbumFeed, FeedState};
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    fn server() -> ServerConfig {
        ServerConfig {
            url: "http://127.0.0.1:9/".into(),
            username: "ann".into(),
            password: "sesame".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("https://music.example/", "ping"),
            "https://music.example/rest/ping"
        );
        assert_eq!(
            endpoint_url("https://music.example/sub", "getCoverArt"),
            "https://music.example/sub/rest/getCoverArt"
        );
    }

    #[test]
    fn test_auth_params_use_salted_token() {
        let params = auth_params(&server(), "c19b2d");
        let get = |k: &str| params.iter().find(|(p, _)| *p == k).map(|(_, v)| v.as_str());
        assert_eq!(get("u"), Some("ann"));
        assert_eq!(get("s"), Some("c19b2d"));
        assert_eq!(
            get("t"),
            Some(format!("{:x}", md5::compute("sesamec19b2d")).as_str())
        );
        assert_eq!(get("f"), Some("json"));
        assert_eq!(get("c"), Some("cadenza"));
        assert!(params.iter().all(|(_, v)| v != "sesame"));
    }

    #[test]
    fn test_parse_album_list() {
        let body = r#"{"subsonic-response": {"status": "ok", "version": "1.16.1",
            "albumList2": {"album": [
                {"id": "a1", "name": "Blue", "artist": "Joni", "year": 1971,
                 "coverArt": "al-a1", "songCount": 10},
                {"id": "a2", "name": "Untitled"}
            ]}}}"#;
        let albums = parse_album_list(body).unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].name, "Blue");
        assert_eq!(albums[0].year, Some(1971));
        assert_eq!(albums[0].song_count, 10);
        assert_eq!(albums[1].artist, "");
    }

    #[test]
    fn test_parse_empty_album_list() {
        let body = r#"{"subsonic-response": {"status": "ok", "albumList2": {}}}"#;
        assert!(parse_album_list(body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"subsonic-response": {"status": "failed",
            "error": {"code": 40, "message": "Wrong username or password"}}}"#;
        assert_eq!(
            parse_album_list(body).unwrap_err(),
            FetchError::Api {
                code: 40,
                message: "Wrong username or password".into()
            }
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_album_list("<html>"), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_cover_cache_path_is_sanitized() {
        let covers = SubsonicCovers::new(
            Arc::new(SubsonicClient::new(server())),
            PathBuf::from("/tmp/covers"),
            300,
        );
        let path = covers.cache_path("al-../x y");
        assert_eq!(path.parent(), Some(std::path::Path::new("/tmp/covers")));
        let name = path.file_name().unwrap().to_str().unwrap();
        let digest = format!("{:x}", md5::compute("al-../x y"));
        assert_eq!(name, format!("al-___x_y-{}-300", &digest[..8]));
    }

    #[test]
    fn test_cover_cache_path_keeps_ids_apart() {
        let covers = SubsonicCovers::new(
            Arc::new(SubsonicClient::new(server())),
            PathBuf::from("/tmp/covers"),
            300,
        );
        assert_ne!(covers.cache_path("a/b"), covers.cache_path("a_b"));
        assert_eq!(covers.cache_path("a/b"), covers.cache_path("a/b"));
    }

    /// Serves `total` albums; calls listed in `fail_calls` (1-based) fail.
    struct ScriptedPages {
        total: usize,
        fail_calls: Vec<usize>,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl ScriptedPages {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_calls: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl AlbumPages for ScriptedPages {
        fn album_page(&self, _kind: &str, size: usize, offset: usize) -> Result<Vec<Album>, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((size, offset));
            if self.fail_calls.contains(&calls.len()) {
                return Err(FetchError::Http("status 503".into()));
            }
            let end = (offset + size).min(self.total);
            Ok((offset.min(end)..end)
                .map(|i| Album {
                    id: format!("al-{}", i),
                    ..Default::default()
                })
                .collect())
        }
    }

    fn feed_over(pages: Arc<ScriptedPages>) -> AlbumFeed {
        AlbumFeed::new(Some(Box::new(SubsonicAlbumIterator::new(pages, "newest"))))
    }

    fn wait_idle(feed: &mut AlbumFeed) {
        while feed.is_fetching() {
            feed.poll();
            thread::yield_now();
        }
    }

    fn ids(feed: &AlbumFeed) -> Vec<String> {
        feed.albums().iter().map(|a| a.id.clone()).collect()
    }

    #[test]
    fn test_iterator_advances_offset() {
        let pages = Arc::new(ScriptedPages::new(100));
        let mut feed = feed_over(pages.clone());
        feed.fetch_more(10);
        wait_idle(&mut feed);
        feed.fetch_more(15);
        wait_idle(&mut feed);

        assert_eq!(*pages.calls.lock().unwrap(), vec![(10, 0), (15, 10)]);
        let expected: Vec<String> = (0..25).map(|i| format!("al-{}", i)).collect();
        assert_eq!(ids(&feed), expected);
        assert_eq!(feed.state(), FeedState::Idle);
    }

    #[test]
    fn test_iterator_short_page_ends() {
        let pages = Arc::new(ScriptedPages::new(25));
        let mut feed = feed_over(pages.clone());
        for _ in 0..3 {
            feed.fetch_more(10);
            wait_idle(&mut feed);
        }
        assert_eq!(feed.len(), 25);
        assert!(feed.is_exhausted());
        assert!(!feed.fetch_more(10));
        assert_eq!(pages.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_iterator_failure_then_retry_has_no_gaps() {
        let mut scripted = ScriptedPages::new(100);
        scripted.fail_calls = vec![2];
        let pages = Arc::new(scripted);
        let mut feed = feed_over(pages.clone());

        feed.fetch_more(10);
        wait_idle(&mut feed);
        feed.fetch_more(10);
        wait_idle(&mut feed);
        assert_eq!(feed.take_error(), Some(FetchError::Http("status 503".into())));
        assert_eq!(feed.len(), 10);

        feed.fetch_more(10);
        wait_idle(&mut feed);
        assert_eq!(*pages.calls.lock().unwrap(), vec![(10, 0), (10, 10), (10, 10)]);
        let expected: Vec<String> = (0..20).map(|i| format!("al-{}", i)).collect();
        assert_eq!(ids(&feed), expected);
    }

    #[test]
    fn test_iterator_splits_large_requests() {
        let pages = Arc::new(ScriptedPages::new(2000));
        let mut feed = feed_over(pages.clone());
        feed.fetch_more(1200);
        wait_idle(&mut feed);

        assert_eq!(
            *pages.calls.lock().unwrap(),
            vec![(MAX_PAGE, 0), (MAX_PAGE, 500), (200, 1000)]
        );
        assert_eq!(feed.len(), 1200);
        assert_eq!(feed.get(1199).map(|a| a.id.as_str()), Some("al-1199"));
        assert_eq!(feed.state(), FeedState::Idle);
    }

    #[test]
    fn test_cover_served_from_disk_cache() {
        let dir = std::env::temp_dir().join(format!("cadenza-covers-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let covers = SubsonicCovers::new(Arc::new(SubsonicClient::new(server())), dir.clone(), 64);

        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(img.clone())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        fs::write(covers.cache_path("al-7"), &png).unwrap();

        assert_eq!(covers.fetch_thumbnail("al-7").unwrap(), img);
        let _ = fs::remove_dir_all(&dir);
    }
}
