//! Mock serial port implementation for testing
//!
//! This module provides a mock serial port that can be used to test the
//! Module M link driver without requiring actual hardware. The mock is
//! cloneable; clones share the same buffers, so a test can keep one clone
//! for queueing device traffic and inspecting host writes while the driver
//! owns the other.
//!
//! An empty receive buffer reads as end-of-stream, which the connection
//! manager interprets as the device vanishing. Queue all traffic for a tick
//! before running it, or use [`MockSerialPort::set_next_error`] to exercise
//! the failure path explicitly.

use crate::constants::{ERROR_LINE_TERMINATOR, FRAME_MARKER, REGISTER_CONFIRM_HEADER};
use crate::link::frame::{encode_live, LiveFrame};
use crate::link::serial::SerialLink;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Mock serial port that simulates bidirectional communication.
#[derive(Clone, Default)]
pub struct MockSerialPort {
    /// Data written to the port (host to device).
    tx_buffer: Arc<Mutex<Vec<u8>>>,
    /// Data to be read from the port (device to host).
    rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// Error returned by the next read or write.
    next_error: Arc<Mutex<Option<io::Error>>>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes to be read from the port.
    pub fn queue_rx_data(&self, data: &[u8]) {
        self.rx_buffer.lock().unwrap().extend(data);
    }

    /// Queue a registration confirmation carrying the given identity bytes.
    /// Identities shorter than the wire length are zero-padded so tests can
    /// use readable serials.
    pub fn queue_registration_confirm(&self, identity: &[u8]) {
        let mut frame = REGISTER_CONFIRM_HEADER.to_vec();
        frame.extend_from_slice(identity);
        frame.resize(REGISTER_CONFIRM_HEADER.len() + crate::constants::IDENTITY_LEN, 0);
        self.queue_rx_data(&frame);
    }

    /// Queue a `C` or `D` frame for the given readings.
    pub fn queue_live_frame(&self, frame: &LiveFrame) {
        self.queue_rx_data(&encode_live(frame));
    }

    /// Queue an `E` frame with the given lines.
    pub fn queue_error_report(&self, lines: &[&str]) {
        let mut frame = vec![FRAME_MARKER, crate::constants::CMD_ERROR_REPORT, lines.len() as u8];
        for line in lines {
            frame.extend_from_slice(line.as_bytes());
            frame.extend_from_slice(&ERROR_LINE_TERMINATOR);
        }
        self.queue_rx_data(&frame);
    }

    /// Everything the host wrote to the port so far.
    pub fn get_tx_data(&self) -> Vec<u8> {
        self.tx_buffer.lock().unwrap().clone()
    }

    /// Clear both directions.
    pub fn clear(&self) {
        self.tx_buffer.lock().unwrap().clear();
        self.rx_buffer.lock().unwrap().clear();
    }

    /// Make the next read or write fail with the given error.
    pub fn set_next_error(&self, error: io::Error) {
        *self.next_error.lock().unwrap() = Some(error);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Poll::Ready(Err(error));
        }

        let mut rx = self.rx_buffer.lock().unwrap();
        let available = rx.len().min(buf.remaining());
        if available > 0 {
            let data: Vec<u8> = rx.drain(..available).collect();
            buf.put_slice(&data);
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Poll::Ready(Err(error));
        }

        self.tx_buffer.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl SerialLink for MockSerialPort {
    async fn flush(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_and_share_buffers() {
        let port = MockSerialPort::new();
        let clone = port.clone();
        clone.queue_rx_data(&[1, 2, 3]);
        assert_eq!(port.rx_buffer.lock().unwrap().len(), 3);

        port.clear();
        assert!(clone.rx_buffer.lock().unwrap().is_empty());
    }

    #[test]
    fn test_queue_registration_confirm_is_padded() {
        let port = MockSerialPort::new();
        port.queue_registration_confirm(b"SN42");
        let rx: Vec<u8> = port.rx_buffer.lock().unwrap().iter().copied().collect();
        assert_eq!(rx.len(), crate::constants::REGISTER_CONFIRM_LEN);
        assert_eq!(&rx[..2], &REGISTER_CONFIRM_HEADER);
        assert_eq!(&rx[2..6], b"SN42");
        assert!(rx[6..].iter().all(|&b| b == 0));
    }
}
