//! Fixed-capacity framing unit.
//!
//! Layout: `[u32 little-endian header length][header bytes][payload bytes]`.
//! The header is ASCII `key=value;` pairs. The payload has no length field of
//! its own; it runs to the end of the packet.

use std::collections::BTreeMap;

use super::error::WireError;

/// Default packet capacity in bytes.
pub const DEFAULT_PACKET_CAPACITY: usize = 1_000_000;

/// Size of the header length prefix.
pub const LENGTH_PREFIX_BYTES: usize = 4;

const KV_SEPARATOR: char = '=';
const PAIR_SEPARATOR: char = ';';

/// Header mapping carried by every packet. Ordering has no meaning on the wire.
pub type WireHeader = BTreeMap<String, String>;

/// Reusable packet buffer. `clear()` resets the size but keeps the allocation.
#[derive(Clone, Debug)]
pub struct Packet {
    buffer: Vec<u8>,
    size: usize,
}

impl Packet {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity.max(LENGTH_PREFIX_BYTES)],
            size: 0,
        }
    }

    /// Bytes needed to serialize `header`, excluding the length prefix.
    pub fn serialized_header_len(header: &WireHeader) -> usize {
        header
            .iter()
            .map(|(key, value)| key.len() + value.len() + 2)
            .sum()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes currently in use (prefix + header + payload).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Header length as stored in the prefix; zero before any header is written.
    pub fn header_len(&self) -> usize {
        if self.size < LENGTH_PREFIX_BYTES {
            return 0;
        }
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_BYTES]);
        u32::from_le_bytes(prefix) as usize
    }

    /// Payload bytes that still fit after what has been written.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.size.max(LENGTH_PREFIX_BYTES)
    }

    /// Write `header` at offset 0, discarding any previous content.
    ///
    /// Fails without touching the buffer when the header does not fit or a key
    /// or value contains a separator.
    pub fn write_header(&mut self, header: &WireHeader) -> Result<&mut Self, WireError> {
        validate_header(header)?;
        let header_len = Self::serialized_header_len(header);
        let size = LENGTH_PREFIX_BYTES + header_len;
        if size > self.capacity() || u32::try_from(header_len).is_err() {
            return Err(WireError::HeaderTooLarge {
                size,
                capacity: self.capacity(),
            });
        }

        let mut pos = LENGTH_PREFIX_BYTES;
        for (key, value) in header {
            for part in [key.as_bytes(), b"=", value.as_bytes(), b";"] {
                self.buffer[pos..pos + part.len()].copy_from_slice(part);
                pos += part.len();
            }
        }
        self.buffer[..LENGTH_PREFIX_BYTES].copy_from_slice(&(header_len as u32).to_le_bytes());
        self.size = size;
        Ok(self)
    }

    /// Append payload bytes after the header, truncated to the remaining
    /// capacity. Returns how many bytes were written.
    pub fn write_data(&mut self, data: &[u8]) -> usize {
        if self.size < LENGTH_PREFIX_BYTES {
            self.buffer[..LENGTH_PREFIX_BYTES].copy_from_slice(&0u32.to_le_bytes());
            self.size = LENGTH_PREFIX_BYTES;
        }
        let written = data.len().min(self.remaining_capacity());
        self.buffer[self.size..self.size + written].copy_from_slice(&data[..written]);
        self.size += written;
        written
    }

    /// Parse the stored header back into a mapping.
    pub fn header(&self) -> Result<WireHeader, WireError> {
        let start = LENGTH_PREFIX_BYTES.min(self.size);
        let raw = &self.buffer[start..start + self.header_len()];
        let text = std::str::from_utf8(raw)
            .map_err(|_| WireError::Malformed("header is not valid UTF-8".to_string()))?;
        Ok(parse_header(text))
    }

    /// Payload region following the header.
    pub fn data(&self) -> &[u8] {
        let start = (LENGTH_PREFIX_BYTES + self.header_len()).min(self.size);
        &self.buffer[start..self.size]
    }

    /// Bytes to put on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    /// Whole backing buffer, for receiving into. Follow with `set_size`.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Declare how many bytes of the buffer hold a received packet, checking
    /// that the length prefix is consistent with them.
    pub fn set_size(&mut self, size: usize) -> Result<(), WireError> {
        if size > self.capacity() {
            return Err(WireError::Malformed(format!(
                "packet size {} exceeds capacity {}",
                size,
                self.capacity()
            )));
        }
        if size < LENGTH_PREFIX_BYTES {
            self.size = 0;
            return Err(WireError::Malformed(format!(
                "packet of {} bytes is shorter than the length prefix",
                size
            )));
        }
        self.size = size;
        let header_len = self.header_len();
        if LENGTH_PREFIX_BYTES + header_len > size {
            self.size = 0;
            return Err(WireError::Malformed(format!(
                "header length {} overruns packet of {} bytes",
                header_len, size
            )));
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.size = 0;
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new(DEFAULT_PACKET_CAPACITY)
    }
}

fn validate_header(header: &WireHeader) -> Result<(), WireError> {
    for (key, value) in header {
        if key.is_empty() || key.contains([KV_SEPARATOR, PAIR_SEPARATOR]) {
            return Err(WireError::InvalidHeader(format!("bad key '{}'", key)));
        }
        if value.contains(PAIR_SEPARATOR) {
            return Err(WireError::InvalidHeader(format!(
                "value for '{}' contains '{}'",
                key, PAIR_SEPARATOR
            )));
        }
    }
    Ok(())
}

/// Split `key=value;key=value` text. A trailing separator is optional;
/// segments without `=` are ignored.
pub fn parse_header(text: &str) -> WireHeader {
    text.split(PAIR_SEPARATOR)
        .filter_map(|pair| pair.split_once(KV_SEPARATOR))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(pairs: &[(&str, &str)]) -> WireHeader {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn header_and_payload_round_trip() {
        let mut packet = Packet::new(256);
        let h = header(&[("REQUEST", "POST"), ("Done", "1"), ("Timestamp", "100")]);
        packet.write_header(&h).unwrap();
        assert_eq!(packet.write_data(b"payload bytes"), 13);

        assert_eq!(packet.header().unwrap(), h);
        assert_eq!(packet.data(), b"payload bytes");
        assert_eq!(
            packet.size(),
            LENGTH_PREFIX_BYTES + Packet::serialized_header_len(&h) + 13
        );
    }

    #[test]
    fn wire_bytes_are_length_prefixed_ascii() {
        let mut packet = Packet::new(64);
        packet.write_header(&header(&[("Done", "1")])).unwrap();
        packet.write_data(b"xy");
        assert_eq!(packet.as_bytes(), b"\x07\x00\x00\x00Done=1;xy");
    }

    #[test]
    fn write_data_truncates_to_remaining_capacity() {
        let mut packet = Packet::new(16);
        packet.write_header(&header(&[("a", "b")])).unwrap();
        // 16 - 4 - 4 = 8 bytes of room
        assert_eq!(packet.remaining_capacity(), 8);
        assert_eq!(packet.write_data(&[7u8; 20]), 8);
        assert_eq!(packet.size(), 16);
        assert_eq!(packet.write_data(b"more"), 0);
    }

    #[test]
    fn oversized_header_is_rejected_without_writing() {
        let mut packet = Packet::new(16);
        packet.write_header(&header(&[("a", "b")])).unwrap();
        let err = packet
            .write_header(&header(&[("FileName", "far_too_long_for_this_packet")]))
            .unwrap_err();
        assert!(matches!(err, WireError::HeaderTooLarge { .. }));
        assert_eq!(packet.header().unwrap(), header(&[("a", "b")]));
    }

    #[test]
    fn header_exactly_filling_capacity_is_accepted() {
        let mut packet = Packet::new(10);
        // "ab=cd;" is 6 bytes, 4 + 6 = 10
        packet.write_header(&header(&[("ab", "cd")])).unwrap();
        assert_eq!(packet.remaining_capacity(), 0);
    }

    #[test]
    fn separators_in_keys_or_values_are_rejected() {
        let mut packet = Packet::new(64);
        assert!(matches!(
            packet.write_header(&header(&[("a=b", "c")])),
            Err(WireError::InvalidHeader(_))
        ));
        assert!(matches!(
            packet.write_header(&header(&[("a", "b;c")])),
            Err(WireError::InvalidHeader(_))
        ));
    }

    #[test]
    fn clear_keeps_allocation() {
        let mut packet = Packet::new(32);
        packet.write_header(&header(&[("k", "v")])).unwrap();
        packet.clear();
        assert_eq!(packet.size(), 0);
        assert_eq!(packet.capacity(), 32);
        assert!(packet.data().is_empty());
    }

    #[test]
    fn set_size_validates_received_prefix() {
        let mut packet = Packet::new(32);
        let bytes = b"\x04\x00\x00\x00k=v;data";
        packet.buffer_mut()[..bytes.len()].copy_from_slice(bytes);
        packet.set_size(bytes.len()).unwrap();
        assert_eq!(packet.header().unwrap(), header(&[("k", "v")]));
        assert_eq!(packet.data(), b"data");

        packet.buffer_mut()[..4].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            packet.set_size(bytes.len()),
            Err(WireError::Malformed(_))
        ));
        assert!(matches!(packet.set_size(2), Err(WireError::Malformed(_))));
    }

    #[test]
    fn parse_header_tolerates_missing_trailing_separator() {
        assert_eq!(
            parse_header("REQUEST=GET;Done=1"),
            header(&[("REQUEST", "GET"), ("Done", "1")])
        );
        assert_eq!(parse_header(""), WireHeader::new());
    }
}
