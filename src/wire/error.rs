/// Errors raised by packet framing and the chunked protocol.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Connect, send or receive failed at the socket level.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Serialized header does not fit in the packet.
    #[error("header size is too big ({size} > {capacity})")]
    HeaderTooLarge { size: usize, capacity: usize },

    /// Header key or value contains a reserved separator.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Received bytes do not form a valid packet.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Peer closed the stream before sending the final chunk.
    #[error("connection closed before final chunk ({received} payload bytes discarded)")]
    Truncated { received: usize },
}

impl WireError {
    /// True for failures a caller may reasonably retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Truncated { .. })
    }
}
