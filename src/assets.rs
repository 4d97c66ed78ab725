//! Startup fetch of the detection model and labelmap from the aggregator.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::wire::{ByteStreamClient, Protocol};

const STOP_POLL: Duration = Duration::from_millis(50);

/// Keys under which the aggregator serves the model assets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetKeys {
    pub model: String,
    pub labelmap: String,
}

/// Raw model and labelmap bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelAssets {
    pub model: Vec<u8>,
    pub labelmap: Vec<u8>,
}

/// Run `op` until it succeeds, sleeping `delay` after each failure.
///
/// Gives up with an error once `stop` is set; the flag is checked between
/// attempts and while sleeping.
pub fn retry_with_delay<T>(
    what: &str,
    delay: Duration,
    stop: &AtomicBool,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 1u32;
    loop {
        if stop.load(Ordering::SeqCst) {
            return Err(anyhow!("{} cancelled after {} attempts", what, attempt - 1));
        }
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                log::warn!(
                    "{} failed (attempt {}): {:#}; retrying in {} ms",
                    what,
                    attempt,
                    e,
                    delay.as_millis()
                );
            }
        }
        let deadline = Instant::now() + delay;
        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
        attempt += 1;
    }
}

fn fetch_one<C: ByteStreamClient + ?Sized>(
    client: &mut C,
    protocol: &mut Protocol,
    key: &str,
) -> Result<Vec<u8>> {
    let response = protocol.get(client, key)?;
    if response.data.is_empty() {
        return Err(anyhow!("aggregator returned no data for {}", key));
    }
    Ok(response.data)
}

/// GET the model, then the labelmap, retrying each until it arrives with a
/// non-empty payload or `stop` is set.
pub fn fetch_assets<C: ByteStreamClient + ?Sized>(
    client: &mut C,
    protocol: &mut Protocol,
    keys: &AssetKeys,
    delay: Duration,
    stop: &AtomicBool,
) -> Result<ModelAssets> {
    let model = retry_with_delay(&format!("GET {}", keys.model), delay, stop, || {
        fetch_one(client, protocol, &keys.model)
    })?;
    let labelmap = retry_with_delay(&format!("GET {}", keys.labelmap), delay, stop, || {
        fetch_one(client, protocol, &keys.labelmap)
    })?;
    log::info!(
        "fetched {} ({} bytes) and {} ({} bytes)",
        keys.model,
        model.len(),
        keys.labelmap,
        labelmap.len()
    );
    Ok(ModelAssets { model, labelmap })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MemoryClient, WireHeader};
    use std::cell::Cell;

    fn reply(payload: &[u8]) -> Vec<u8> {
        let mut server = MemoryClient::new();
        Protocol::new()
            .post(&mut server, payload, Some(&WireHeader::new()))
            .unwrap();
        server.sent().remove(0)
    }

    fn keys() -> AssetKeys {
        AssetKeys {
            model: "model/model.tflite".to_string(),
            labelmap: "model/labelmap.txt".to_string(),
        }
    }

    #[test]
    fn retry_stops_at_first_success() {
        let calls = Cell::new(0);
        let stop = AtomicBool::new(false);
        let value = retry_with_delay("op", Duration::from_millis(1), &stop, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(anyhow!("not yet"))
            } else {
                Ok(calls.get())
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn retry_honors_stop_flag() {
        let stop = AtomicBool::new(true);
        let result: Result<()> = retry_with_delay("op", Duration::from_secs(60), &stop, || {
            Err(anyhow!("never called"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn fetch_retries_refused_connections_and_empty_payloads() {
        let mut client = MemoryClient::new();
        client.fail_next_connects(1);
        client.push_response(reply(b""));
        client.push_response(reply(b"MODEL"));
        client.push_response(reply(b"???\nperson\n"));

        let stop = AtomicBool::new(false);
        let assets = fetch_assets(
            &mut client,
            &mut Protocol::new(),
            &keys(),
            Duration::from_millis(1),
            &stop,
        )
        .unwrap();

        assert_eq!(assets.model, b"MODEL");
        assert_eq!(assets.labelmap, b"???\nperson\n");
        assert_eq!(client.connect_attempts(), 4);

        let requests = client.sent();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].ends_with(b"model/model.tflite"));
        assert!(requests[2].ends_with(b"model/labelmap.txt"));
    }
}
