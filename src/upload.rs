//! Lossy-but-fresh frame upload to the aggregator.
//!
//! `feed` overwrites a `LatestSlot` and signals a deferred `WorkerLoop`. A
//! burst of feeds during an in-flight upload collapses into one follow-up
//! upload of the newest frame. Network failures are logged and counted; the
//! next feed tries again on a fresh connection.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::listeners::{ListenerId, ListenerList};
use crate::slot::LatestSlot;
use crate::wire::{
    ByteStreamClient, Protocol, Response, TcpClient, WireHeader, DEFAULT_PACKET_CAPACITY,
    KEY_FILE_FORMAT,
};
use crate::worker::WorkerLoop;

/// Header carrying the caller's frame timestamp.
pub const KEY_TIMESTAMP: &str = "Timestamp";
/// Header carrying the comma-joined detected labels.
pub const KEY_OBJECTS: &str = "Objects";
/// Format tag of uploaded frames.
pub const JPEG_FORMAT: &str = ".jpg";

#[derive(Clone, Debug, PartialEq)]
pub struct UploadConfig {
    pub jpeg_quality: u8,
    pub packet_capacity: usize,
    /// Minimum time between two rounds of GET listener polls.
    pub settings_poll: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            packet_capacity: DEFAULT_PACKET_CAPACITY,
            settings_poll: Duration::from_secs(5),
        }
    }
}

/// Upload counters since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Wire bytes of the last successful upload.
    pub last_wire_bytes: u64,
}

struct UploadJob {
    image: RgbImage,
    timestamp: String,
    labels: Vec<String>,
}

struct GetListener {
    key: String,
    callback: Box<dyn Fn(&Response) + Send + Sync>,
}

struct Channel {
    client: Box<dyn ByteStreamClient>,
    protocol: Protocol,
}

struct UploaderCore {
    config: UploadConfig,
    channel: Mutex<Channel>,
    getters: ListenerList<GetListener>,
    last_poll: Mutex<Option<Instant>>,
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    last_wire_bytes: AtomicU64,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(image)
        .context("JPEG encoding failed")?;
    Ok(bytes)
}

/// Local wall-clock time in the format the aggregator files frames under.
pub fn wall_clock_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// `Objects` header value. `;` terminates a header pair on the wire, so it is
/// replaced inside labels.
fn objects_value(labels: &[String]) -> String {
    labels
        .iter()
        .map(|label| label.replace(';', "_"))
        .collect::<Vec<_>>()
        .join(",")
}

impl UploaderCore {
    fn upload(&self, job: UploadJob) {
        self.attempted.fetch_add(1, Ordering::SeqCst);
        match self.try_upload(&job) {
            Ok(wire_bytes) => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                self.last_wire_bytes.store(wire_bytes, Ordering::SeqCst);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                log::error!("upload of frame {} failed: {:#}", job.timestamp, e);
            }
        }
    }

    fn try_upload(&self, job: &UploadJob) -> Result<u64> {
        let jpeg = encode_jpeg(&job.image, self.config.jpeg_quality)?;
        let mut headers = WireHeader::new();
        headers.insert(KEY_TIMESTAMP.to_string(), job.timestamp.clone());
        headers.insert(KEY_FILE_FORMAT.to_string(), JPEG_FORMAT.to_string());
        headers.insert(KEY_OBJECTS.to_string(), objects_value(&job.labels));

        let mut channel = lock(&self.channel);
        let Channel { client, protocol } = &mut *channel;
        let summary = protocol.post(client.as_mut(), &jpeg, Some(&headers))?;
        log::debug!(
            "uploaded frame {} in {} packets ({} bytes)",
            job.timestamp,
            summary.packets,
            summary.wire_bytes
        );
        Ok(summary.wire_bytes as u64)
    }

    fn poll_due(&self) -> bool {
        let mut last = lock(&self.last_poll);
        let due = last.map_or(true, |at| at.elapsed() >= self.config.settings_poll);
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    fn poll_getters(&self) {
        let getters = self.getters.snapshot();
        if getters.is_empty() || !self.poll_due() {
            return;
        }
        let mut channel = lock(&self.channel);
        let Channel { client, protocol } = &mut *channel;
        for getter in getters {
            match protocol.get(client.as_mut(), &getter.key) {
                Ok(response) => (getter.callback)(&response),
                Err(e) => log::warn!("GET {} failed: {}", getter.key, e),
            }
        }
    }
}

/// Background uploader owning one connection context to the aggregator.
pub struct Uploader {
    core: Arc<UploaderCore>,
    input: Arc<LatestSlot<UploadJob>>,
    worker: WorkerLoop,
}

impl Uploader {
    /// Uploader talking TCP to `host:port`. Nothing connects until the first
    /// upload.
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_config(host, port, UploadConfig::default())
    }

    pub fn with_config(host: &str, port: u16, config: UploadConfig) -> Self {
        Self::with_client(Box::new(TcpClient::new(host, port)), config)
    }

    pub fn with_client(client: Box<dyn ByteStreamClient>, config: UploadConfig) -> Self {
        let protocol = Protocol::with_capacity(config.packet_capacity);
        let core = Arc::new(UploaderCore {
            config,
            channel: Mutex::new(Channel { client, protocol }),
            getters: ListenerList::new(),
            last_poll: Mutex::new(None),
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_wire_bytes: AtomicU64::new(0),
        });
        let input = Arc::new(LatestSlot::new());
        let worker = WorkerLoop::new(false);

        let pass_core = core.clone();
        let pass_input: Arc<LatestSlot<UploadJob>> = input.clone();
        worker.add_listener(move || {
            if let Some(job) = pass_input.take() {
                pass_core.upload(job);
            }
            pass_core.poll_getters();
        });

        Self {
            core,
            input,
            worker,
        }
    }

    /// Queue `image` for upload, replacing any frame not yet picked up.
    pub fn feed(&self, image: RgbImage, timestamp: impl Into<String>, labels: Vec<String>) {
        self.input.store(UploadJob {
            image,
            timestamp: timestamp.into(),
            labels,
        });
        self.worker.signal();
    }

    /// Poll `key` with a GET from the upload thread, at most once per
    /// `settings_poll`. Responses go to `callback`; failures are logged.
    pub fn add_get_listener<F>(&self, key: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.core.getters.add(Arc::new(GetListener {
            key: key.into(),
            callback: Box::new(callback),
        }))
    }

    pub fn remove_get_listener(&self, id: ListenerId) -> bool {
        self.core.getters.remove(id)
    }

    /// Poll the GET listeners on the next pass regardless of the interval,
    /// and schedule that pass.
    pub fn poll_now(&self) {
        *lock(&self.core.last_poll) = None;
        self.worker.signal();
    }

    pub fn stats(&self) -> UploadStats {
        UploadStats {
            attempted: self.core.attempted.load(Ordering::SeqCst),
            succeeded: self.core.succeeded.load(Ordering::SeqCst),
            failed: self.core.failed.load(Ordering::SeqCst),
            last_wire_bytes: self.core.last_wire_bytes.load(Ordering::SeqCst),
        }
    }

    /// Whether a frame is waiting for the upload thread.
    pub fn has_pending(&self) -> bool {
        self.input.has_value()
    }

    /// Stop the upload thread after the in-flight upload, dropping any
    /// pending frame.
    pub fn close(&mut self) -> Result<()> {
        self.worker.close()?;
        self.input.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MemoryClient, Protocol, KEY_DONE, KEY_REQUEST, REQUEST_POST};
    use image::Rgb;
    use std::sync::mpsc;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn decode_post(bytes: Vec<u8>) -> Response {
        let mut server = MemoryClient::new();
        server.push_response(bytes);
        Protocol::new().receive(&mut server).unwrap()
    }

    #[test]
    fn feed_posts_jpeg_with_metadata_headers() {
        let client = MemoryClient::new();
        let uploader = Uploader::with_client(Box::new(client.clone()), UploadConfig::default());

        uploader.feed(
            RgbImage::from_pixel(16, 16, Rgb([10, 200, 30])),
            "2024-01-01 00:00:00.000",
            vec!["person".to_string(), "dog".to_string()],
        );
        assert!(wait_until(Duration::from_secs(5), || uploader
            .stats()
            .succeeded
            == 1));

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        let posted = decode_post(sent[0].clone());
        assert_eq!(posted.header(KEY_REQUEST), Some(REQUEST_POST));
        assert_eq!(posted.header(KEY_DONE), Some("1"));
        assert_eq!(posted.header(KEY_TIMESTAMP), Some("2024-01-01 00:00:00.000"));
        assert_eq!(posted.header(KEY_FILE_FORMAT), Some(JPEG_FORMAT));
        assert_eq!(posted.header(KEY_OBJECTS), Some("person,dog"));
        assert_eq!(&posted.data[..2], &[0xFF, 0xD8]);
        assert!(uploader.stats().last_wire_bytes > 0);
    }

    #[test]
    fn labels_with_separator_still_upload() {
        let client = MemoryClient::new();
        let uploader = Uploader::with_client(Box::new(client.clone()), UploadConfig::default());

        uploader.feed(
            RgbImage::new(8, 8),
            "3",
            vec!["hot;dog".to_string(), "cat".to_string()],
        );
        assert!(wait_until(Duration::from_secs(5), || uploader
            .stats()
            .succeeded
            == 1));
        assert_eq!(uploader.stats().failed, 0);

        let posted = decode_post(client.sent().remove(0));
        assert_eq!(posted.header(KEY_OBJECTS), Some("hot_dog,cat"));
    }

    #[test]
    fn transport_failure_is_counted_and_next_feed_retries() {
        let client = MemoryClient::new();
        client.fail_next_connects(1);
        let uploader = Uploader::with_client(Box::new(client.clone()), UploadConfig::default());
        let image = RgbImage::new(8, 8);

        uploader.feed(image.clone(), "1", Vec::new());
        assert!(wait_until(Duration::from_secs(5), || uploader.stats().failed == 1));

        uploader.feed(image, "2", Vec::new());
        assert!(wait_until(Duration::from_secs(5), || uploader
            .stats()
            .succeeded
            == 1));
        let stats = uploader.stats();
        assert_eq!(stats.attempted, 2);
        assert_eq!(client.connect_attempts(), 2);
    }

    #[test]
    fn get_listeners_are_polled_and_rate_limited() {
        let client = MemoryClient::new();
        let mut reply = MemoryClient::new();
        Protocol::new().post(&mut reply, b"0.75", None).unwrap();
        client.push_response(reply.sent().remove(0));

        let config = UploadConfig {
            settings_poll: Duration::from_secs(3600),
            ..UploadConfig::default()
        };
        let uploader = Uploader::with_client(Box::new(client.clone()), config);
        let (tx, rx) = mpsc::channel();
        uploader.add_get_listener("settings/score", move |response| {
            let _ = tx.send(response.text());
        });

        uploader.poll_now();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "0.75".to_string()
        );

        // Within the interval a feed uploads but does not poll again.
        uploader.feed(RgbImage::new(4, 4), "t", Vec::new());
        assert!(wait_until(Duration::from_secs(5), || uploader
            .stats()
            .succeeded
            == 1));
        assert!(rx.try_recv().is_err());
        assert_eq!(client.closed_connections(), 2);
    }

    #[test]
    fn close_drops_pending_frame() {
        let mut uploader =
            Uploader::with_client(Box::new(MemoryClient::new()), UploadConfig::default());
        uploader.close().unwrap();
        uploader.feed(RgbImage::new(2, 2), "late", Vec::new());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(uploader.stats().attempted, 0);
    }

    #[test]
    fn jpeg_encoding_produces_soi_marker() {
        let jpeg = encode_jpeg(&RgbImage::new(4, 4), 0).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
