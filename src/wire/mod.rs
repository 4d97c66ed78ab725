//! Chunked wire protocol to the aggregator.
//!
//! - `Packet`: fixed-capacity framing unit with a `key=value;` text header
//! - `Protocol`: GET/POST that split and reassemble payloads across packets
//! - `ByteStreamClient`: the transport seam (`TcpClient`, `MemoryClient`)
//!
//! Nothing in this module authenticates or encrypts traffic.

mod client;
mod error;
mod memory;
mod packet;
mod protocol;

pub use client::{ByteStreamClient, TcpClient};
pub use error::WireError;
pub use memory::MemoryClient;
pub use packet::{
    parse_header, Packet, WireHeader, DEFAULT_PACKET_CAPACITY, LENGTH_PREFIX_BYTES,
};
pub use protocol::{
    PostSummary, Protocol, Response, KEY_DONE, KEY_FILE_FORMAT, KEY_FILE_NAME, KEY_REQUEST,
    KEY_STATUS, KEY_STREAM_INDEX, KEY_TIME, KEY_TOTAL_SIZE, REQUEST_GET, REQUEST_POST,
};
