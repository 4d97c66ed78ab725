//! asset_server - development aggregator
//!
//! Serves GET requests from files under `--root` (the request payload is the
//! relative key, e.g. `model/model.tflite`) and stores each POSTed frame as
//! `latest<FileFormat>` in the same directory.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::{TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use watcher_agent::wire::{
    TcpClient, WireHeader, DEFAULT_PACKET_CAPACITY, KEY_FILE_FORMAT, KEY_FILE_NAME, KEY_REQUEST,
    KEY_STATUS, REQUEST_GET, REQUEST_POST,
};
use watcher_agent::{ByteStreamClient, Protocol};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Listen address.
    #[arg(long, env = "WATCHER_BIND", default_value = "127.0.0.1:9000")]
    bind: String,
    /// Directory served to GET requests and receiving uploads.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Packet capacity; must match the agent's.
    #[arg(long, default_value_t = DEFAULT_PACKET_CAPACITY)]
    packet_capacity: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !args.root.is_dir() {
        return Err(anyhow!("root {} is not a directory", args.root.display()));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let listener = TcpListener::bind(&args.bind)
        .with_context(|| format!("failed to bind {}", args.bind))?;
    listener.set_nonblocking(true)?;
    log::info!(
        "asset_server listening on {}, serving {}",
        listener.local_addr()?,
        args.root.display()
    );

    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let root = args.root.clone();
                let capacity = args.packet_capacity;
                std::thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &root, capacity) {
                        log::warn!("request from {} failed: {:#}", peer, e);
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => log::warn!("accept failed: {}", e),
        }
    }

    log::info!("asset_server stopped");
    log::logger().flush();
    Ok(())
}

fn handle_connection(stream: TcpStream, root: &Path, capacity: usize) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut client = TcpClient::from_stream(stream)?;
    let mut protocol = Protocol::with_capacity(capacity);
    let request = protocol.receive(&mut client)?;

    match request.header(KEY_REQUEST) {
        Some(REQUEST_GET) => {
            let key = request.text();
            let (status, body) = match resolve_key(root, &key).and_then(|path| {
                std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
            }) {
                Ok(body) => ("OK", body),
                Err(e) => {
                    log::warn!("GET {}: {:#}", key, e);
                    ("NotFound", Vec::new())
                }
            };
            let mut headers = WireHeader::new();
            headers.insert(KEY_STATUS.to_string(), status.to_string());
            if !key.contains(';') {
                headers.insert(KEY_FILE_NAME.to_string(), key.clone());
            }
            protocol.post(&mut client, &body, Some(&headers))?;
            log::info!("GET {} -> {} ({} bytes)", key, status, body.len());
        }
        Some(REQUEST_POST) => {
            client.close();
            let format = upload_extension(request.header(KEY_FILE_FORMAT));
            let path = root.join(format!("latest{}", format));
            std::fs::write(&path, &request.data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!(
                "POST {} bytes at {} objects=[{}] -> {}",
                request.data.len(),
                request.header("Timestamp").unwrap_or("?"),
                request.header("Objects").unwrap_or(""),
                path.display()
            );
        }
        other => {
            client.close();
            return Err(anyhow!("unknown request type {:?}", other));
        }
    }
    Ok(())
}

/// Map a GET key to a file below `root`, refusing anything that escapes it.
fn resolve_key(root: &Path, key: &str) -> Result<PathBuf> {
    let relative = Path::new(key);
    if key.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(anyhow!("rejected key '{}'", key));
    }
    Ok(root.join(relative))
}

/// `FileFormat` reduced to a safe `.ext` suffix.
fn upload_extension(format: Option<&str>) -> String {
    let ext: String = format
        .unwrap_or("")
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    if ext.is_empty() {
        ".bin".to_string()
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_root() {
        let root = Path::new("/srv/assets");
        assert_eq!(
            resolve_key(root, "model/model.tflite").unwrap(),
            root.join("model/model.tflite")
        );
        assert!(resolve_key(root, "../etc/passwd").is_err());
        assert!(resolve_key(root, "model/../../x").is_err());
        assert!(resolve_key(root, "/etc/passwd").is_err());
        assert!(resolve_key(root, "").is_err());
    }

    #[test]
    fn upload_extension_is_sanitized() {
        assert_eq!(upload_extension(Some(".jpg")), ".jpg");
        assert_eq!(upload_extension(Some("../../x")), ".x");
        assert_eq!(upload_extension(None), ".bin");
    }
}
