use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use watcher_agent::upload::KEY_TIMESTAMP;
use watcher_agent::wire::MemoryClient;
use watcher_agent::{ByteStreamClient, Protocol, UploadConfig, Uploader};

/// Client whose first send blocks until the test releases it.
struct GatedClient {
    inner: MemoryClient,
    entered: Sender<()>,
    release: Arc<Mutex<Receiver<()>>>,
    gated: bool,
}

impl ByteStreamClient for GatedClient {
    fn connect(&mut self) -> io::Result<()> {
        self.inner.connect()
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.gated {
            self.gated = false;
            let _ = self.entered.send(());
            let _ = self.release.lock().unwrap().recv();
        }
        self.inner.send(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.receive(buf)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

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

fn timestamp_of(connection: Vec<u8>) -> String {
    let mut server = MemoryClient::new();
    server.push_response(connection);
    let posted = Protocol::new().receive(&mut server).expect("decode upload");
    posted
        .header(KEY_TIMESTAMP)
        .expect("timestamp header")
        .to_string()
}

#[test]
fn burst_during_inflight_upload_sends_only_newest_frame() {
    let recorder = MemoryClient::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let client = GatedClient {
        inner: recorder.clone(),
        entered: entered_tx,
        release: Arc::new(Mutex::new(release_rx)),
        gated: true,
    };
    let uploader = Uploader::with_client(Box::new(client), UploadConfig::default());
    let frame = |level: u8| RgbImage::from_pixel(16, 16, Rgb([level, level, level]));

    uploader.feed(frame(0), "0", Vec::new());
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first upload started");

    for i in 1..=5u8 {
        uploader.feed(frame(i * 40), i.to_string(), vec![format!("label{}", i)]);
    }
    assert!(uploader.has_pending());
    release_tx.send(()).expect("release first upload");

    assert!(wait_until(Duration::from_secs(5), || uploader
        .stats()
        .succeeded
        == 2));
    std::thread::sleep(Duration::from_millis(100));

    let stats = uploader.stats();
    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.failed, 0);
    assert!(!uploader.has_pending());

    let uploads = recorder.sent();
    assert_eq!(uploads.len(), 2);
    let stamps: Vec<String> = uploads.into_iter().map(timestamp_of).collect();
    assert_eq!(stamps, vec!["0", "5"]);
}

#[test]
fn feed_returns_while_upload_is_blocked() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let client = GatedClient {
        inner: MemoryClient::new(),
        entered: entered_tx,
        release: Arc::new(Mutex::new(release_rx)),
        gated: true,
    };
    let uploader = Uploader::with_client(Box::new(client), UploadConfig::default());

    uploader.feed(RgbImage::new(8, 8), "a", Vec::new());
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("upload started");

    let started = Instant::now();
    for _ in 0..100 {
        uploader.feed(RgbImage::new(8, 8), "b", Vec::new());
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    release_tx.send(()).expect("release upload");
    assert!(wait_until(Duration::from_secs(5), || uploader
        .stats()
        .succeeded
        == 2));
}
