//! In-memory `ByteStreamClient` for tests and offline runs.
//!
//! Each connection (the span between connect and close) gets the next queued
//! inbound byte stream and records everything sent on it. Clones share state,
//! so a test can keep one handle and give another to the code under test.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::client::ByteStreamClient;

#[derive(Debug, Default)]
struct MemoryState {
    responses: VecDeque<Vec<u8>>,
    inbound: Option<(Vec<u8>, usize)>,
    outbound: Option<Vec<u8>>,
    connections: Vec<Vec<u8>>,
    failing_connects: usize,
    connect_attempts: usize,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the byte stream the peer sends on a future connection.
    pub fn push_response(&self, bytes: Vec<u8>) {
        self.lock().responses.push_back(bytes);
    }

    /// Make the next `n` connection attempts fail with `ConnectionRefused`.
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().failing_connects = n;
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Bytes sent per connection, in connection order. Includes the currently
    /// open connection, if any.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        let state = self.lock();
        let mut all = state.connections.clone();
        if let Some(open) = &state.outbound {
            all.push(open.clone());
        }
        all
    }

    /// Number of connections that were closed.
    pub fn closed_connections(&self) -> usize {
        self.lock().connections.len()
    }
}

impl ByteStreamClient for MemoryClient {
    fn connect(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.outbound.is_some() {
            return Ok(());
        }
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }
        let inbound = state.responses.pop_front().unwrap_or_default();
        state.inbound = Some((inbound, 0));
        state.outbound = Some(Vec::new());
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.connect()?;
        let mut state = self.lock();
        if let Some(outbound) = state.outbound.as_mut() {
            outbound.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.connect()?;
        let mut state = self.lock();
        let Some((inbound, pos)) = state.inbound.as_mut() else {
            return Ok(0);
        };
        let n = buf.len().min(inbound.len() - *pos);
        buf[..n].copy_from_slice(&inbound[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.inbound = None;
        if let Some(outbound) = state.outbound.take() {
            state.connections.push(outbound);
        }
    }
}
