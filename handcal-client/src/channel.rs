//! Byte-stream control channel to the display peer.
//!
//! Text messages and raw image payloads share one stream. Anything read past
//! the end of the current message is kept and served to the next receive.

use crate::error::SessionError;
use anyhow::{Context, Result};
use handcal_shared::protocol::{decode_text, RECEIVE_BUFFER_LENGTH};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Read size while streaming image payloads
const IMAGE_READ_CHUNK: usize = 64 * 1024;

pub struct ControlChannel<S> {
    stream: S,
    pending: Vec<u8>,
    read_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<S> ControlChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, cancel: CancellationToken) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            read_timeout: None,
            cancel,
        }
    }

    /// Give up on a receive when the peer stays silent this long
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Send `text`, adding the terminating newline if missing
    pub async fn send_line(&mut self, text: &str) -> Result<(), SessionError> {
        let mut bytes = text.as_bytes().to_vec();
        if bytes.last() != Some(&b'\n') {
            bytes.push(b'\n');
        }
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        log::debug!("-> {}", text.trim_end());
        Ok(())
    }

    /// Next non-empty text message.
    ///
    /// One read (or the leftover of an earlier one) up to its first newline;
    /// the bytes after that newline stay pending.
    pub async fn recv_text(&mut self) -> Result<String, SessionError> {
        self.recv_message(None).await
    }

    /// Next `;`-separated record of `fields` fields.
    ///
    /// Ends at the first newline or right after the `fields`-th `;`,
    /// whichever comes first, so a payload sent straight after a
    /// `;`-terminated record stays pending.
    pub async fn recv_fields(&mut self, fields: usize) -> Result<String, SessionError> {
        self.recv_message(Some(fields)).await
    }

    async fn recv_message(&mut self, fields: Option<usize>) -> Result<String, SessionError> {
        loop {
            let mut chunk = if self.pending.is_empty() {
                let mut buffer = vec![0u8; RECEIVE_BUFFER_LENGTH];
                let n = self.read_some(&mut buffer).await?;
                buffer.truncate(n);
                buffer
            } else {
                std::mem::take(&mut self.pending)
            };

            if let Some(end) = message_end(&chunk, fields) {
                self.pending = chunk.split_off(end);
            }
            let text = decode_text(&chunk);
            if !text.is_empty() {
                log::debug!("<- {}", text);
                return Ok(text);
            }
        }
    }

    /// Read exactly `size` payload bytes.
    ///
    /// `on_first_byte` runs once, as soon as the first byte of the payload is
    /// available. Surplus bytes of the last read stay pending.
    pub async fn recv_exact<F>(&mut self, size: usize, on_first_byte: F) -> Result<Vec<u8>, SessionError>
    where
        F: FnOnce(),
    {
        let mut on_first_byte = Some(on_first_byte);
        let mut payload = std::mem::take(&mut self.pending);
        if !payload.is_empty() {
            if let Some(f) = on_first_byte.take() {
                f();
            }
        }

        let mut buffer = vec![0u8; IMAGE_READ_CHUNK.min(size.max(1))];
        while payload.len() < size {
            let n = self.read_some(&mut buffer).await?;
            if let Some(f) = on_first_byte.take() {
                f();
            }
            payload.extend_from_slice(&buffer[..n]);
        }

        if payload.len() > size {
            self.pending = payload.split_off(size);
        }
        Ok(payload)
    }

    /// Bytes received but not yet consumed
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    async fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize, SessionError> {
        let Self {
            stream,
            read_timeout,
            cancel,
            ..
        } = self;

        let read = async {
            match *read_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.read(buffer)).await {
                    Ok(result) => result.map_err(SessionError::from),
                    Err(_) => Err(SessionError::Timeout(limit)),
                },
                None => stream.read(buffer).await.map_err(SessionError::from),
            }
        };

        let n = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = read => result?,
        };
        if n == 0 {
            return Err(SessionError::ConnectionClosed);
        }
        Ok(n)
    }
}

/// Length of the first message in `chunk`, terminator included
fn message_end(chunk: &[u8], fields: Option<usize>) -> Option<usize> {
    let mut separators = 0;
    for (i, b) in chunk.iter().enumerate() {
        match *b {
            b'\n' => return Some(i + 1),
            b';' => {
                separators += 1;
                if Some(separators) == fields {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Connect to the peer, trying up to `attempts` times with `delay` in between
pub async fn connect_with_retry(
    peer: &str,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match TcpStream::connect(peer).await {
            Ok(stream) => {
                log::info!("Connected to {}", peer);
                return Ok(stream);
            }
            Err(e) => {
                log::warn!("Connection attempt {}/{} to {} failed: {}", attempt, attempts, peer, e);
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("Cancelled while connecting to {}", peer),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    match last_error {
        Some(e) => Err(e).with_context(|| format!("Failed to connect to {} after {} attempts", peer, attempts)),
        None => anyhow::bail!("Failed to connect to {}", peer),
    }
}
