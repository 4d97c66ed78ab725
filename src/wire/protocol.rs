//! Chunked GET/POST over a `ByteStreamClient`.
//!
//! A payload larger than one packet is split into consecutive packets on the
//! same connection. Every chunk repeats the full header; `Done=1` marks the
//! last one. The protocol never retries: retry policy belongs to the caller.

use std::time::Instant;

use super::client::ByteStreamClient;
use super::error::WireError;
use super::packet::{Packet, WireHeader, DEFAULT_PACKET_CAPACITY, LENGTH_PREFIX_BYTES};

pub const KEY_REQUEST: &str = "REQUEST";
pub const REQUEST_GET: &str = "GET";
pub const REQUEST_POST: &str = "POST";

pub const KEY_TOTAL_SIZE: &str = "TotalSize";
pub const KEY_FILE_NAME: &str = "FileName";
pub const KEY_FILE_FORMAT: &str = "FileFormat";
pub const KEY_STREAM_INDEX: &str = "StreamIndex";
pub const KEY_DONE: &str = "Done";
pub const KEY_TIME: &str = "Time";
pub const KEY_STATUS: &str = "Status";

/// Reassembled response: headers merged across chunks plus the concatenated
/// payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub headers: WireHeader,
    pub data: Vec<u8>,
}

impl Response {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Payload as text with trailing whitespace and NULs removed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data)
            .trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
            .to_string()
    }
}

/// What a POST put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostSummary {
    pub packets: usize,
    pub payload_bytes: usize,
    pub wire_bytes: usize,
}

/// Protocol state: one packet buffer reused for every exchange.
pub struct Protocol {
    packet: Packet,
}

impl Protocol {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PACKET_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packet: Packet::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.packet.capacity()
    }

    /// Send `data` as a chunked POST and close the connection.
    ///
    /// `extra_headers` are merged into every chunk; they cannot override
    /// `REQUEST`, `TotalSize` or `Done`. An empty payload is sent as a single
    /// final chunk.
    pub fn post<C: ByteStreamClient + ?Sized>(
        &mut self,
        client: &mut C,
        data: &[u8],
        extra_headers: Option<&WireHeader>,
    ) -> Result<PostSummary, WireError> {
        let result = self.post_chunks(client, data, extra_headers);
        client.close();
        result
    }

    fn post_chunks<C: ByteStreamClient + ?Sized>(
        &mut self,
        client: &mut C,
        data: &[u8],
        extra_headers: Option<&WireHeader>,
    ) -> Result<PostSummary, WireError> {
        let started = Instant::now();
        let mut header = WireHeader::new();
        header.insert(KEY_REQUEST.to_string(), REQUEST_POST.to_string());
        header.insert(KEY_TOTAL_SIZE.to_string(), data.len().to_string());
        header.insert(KEY_DONE.to_string(), "0".to_string());
        if let Some(extra) = extra_headers {
            for (key, value) in extra {
                header
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        // "0" and "1" serialize to the same length, so the room per chunk is
        // fixed for the whole transfer.
        let header_size = LENGTH_PREFIX_BYTES + Packet::serialized_header_len(&header);
        let no_room = header_size == self.packet.capacity() && !data.is_empty();
        if header_size > self.packet.capacity() || no_room {
            return Err(WireError::HeaderTooLarge {
                size: header_size,
                capacity: self.packet.capacity(),
            });
        }
        let room = self.packet.capacity() - header_size;

        let mut summary = PostSummary {
            packets: 0,
            payload_bytes: 0,
            wire_bytes: 0,
        };
        loop {
            let remaining = data.len() - summary.payload_bytes;
            let done = remaining <= room;
            header.insert(KEY_DONE.to_string(), if done { "1" } else { "0" }.to_string());

            self.packet.clear();
            self.packet.write_header(&header)?;
            let written = self.packet.write_data(&data[summary.payload_bytes..]);
            send_all(client, self.packet.as_bytes())?;

            summary.packets += 1;
            summary.payload_bytes += written;
            summary.wire_bytes += self.packet.size();
            log::debug!(
                "sent {} bytes ({}/{})",
                written,
                summary.payload_bytes,
                data.len()
            );
            if done {
                break;
            }
        }

        let secs = started.elapsed().as_secs_f64();
        if secs > 0.0 {
            log::debug!(
                "post finished: {} packets, {:.3} MB/s",
                summary.packets,
                summary.wire_bytes as f64 / secs / 1_000_000.0
            );
        }
        Ok(summary)
    }

    /// Request `key` and reassemble the chunked response.
    pub fn get<C: ByteStreamClient + ?Sized>(
        &mut self,
        client: &mut C,
        key: &str,
    ) -> Result<Response, WireError> {
        let result = self.get_inner(client, key);
        client.close();
        result
    }

    fn get_inner<C: ByteStreamClient + ?Sized>(
        &mut self,
        client: &mut C,
        key: &str,
    ) -> Result<Response, WireError> {
        let mut header = WireHeader::new();
        header.insert(KEY_REQUEST.to_string(), REQUEST_GET.to_string());
        header.insert(KEY_DONE.to_string(), "1".to_string());

        self.packet.clear();
        self.packet.write_header(&header)?;
        if self.packet.write_data(key.as_bytes()) < key.len() {
            return Err(WireError::HeaderTooLarge {
                size: self.packet.size() + key.len(),
                capacity: self.packet.capacity(),
            });
        }
        send_all(client, self.packet.as_bytes())?;
        client.finish_sending()?;
        log::debug!("sent GET {} ({} bytes)", key, self.packet.size());

        self.receive(client)
    }

    /// Read packets until one carries `Done=1`.
    ///
    /// Headers from later chunks overwrite earlier ones. End of stream before
    /// the final chunk discards everything received and fails with
    /// `WireError::Truncated`.
    pub fn receive<C: ByteStreamClient + ?Sized>(
        &mut self,
        client: &mut C,
    ) -> Result<Response, WireError> {
        let mut response = Response::default();
        loop {
            self.packet.clear();
            let len = client.receive(self.packet.buffer_mut())?;
            if len == 0 {
                return Err(WireError::Truncated {
                    received: response.data.len(),
                });
            }
            self.packet.set_size(len)?;

            let header = self.packet.header()?;
            let done = header.get(KEY_DONE).map(String::as_str) == Some("1");
            response.headers.extend(header);
            response.data.extend_from_slice(self.packet.data());
            log::debug!("got {} bytes", len);

            if done {
                return Ok(response);
            }
            if len < self.packet.capacity() {
                return Err(WireError::Truncated {
                    received: response.data.len(),
                });
            }
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}

fn send_all<C: ByteStreamClient + ?Sized>(client: &mut C, bytes: &[u8]) -> Result<(), WireError> {
    let sent = client.send(bytes)?;
    if sent != bytes.len() {
        return Err(WireError::Transport(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!("short write: {} of {} bytes", sent, bytes.len()),
        )));
    }
    Ok(())
}
