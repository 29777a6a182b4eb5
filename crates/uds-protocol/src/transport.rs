//! Diagnostic Transport
//!
//! One transport instance is shared by all requester slots (sends) and
//! the single capture reader (receives). Sends are fire-and-forget;
//! responses arrive asynchronously and are matched by the scheduler.
//!
//! A loopback mode answers requests synthetically without hardware,
//! mirroring how the discovery tooling is exercised on the bench.

use crate::doip::{self, DiagFrame, DoipPayload};
use crate::error::UdsError;
use crate::response::ResponseCode;
use crate::service;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Diagnostic transport handle
pub struct UdsTransport {
    inner: Inner,
}

enum Inner {
    Tcp(TcpTransport),
    Loopback(Loopback),
}

struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

/// Behavior of the loopback transport
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Response payload length per (server, did); `default_payload_len`
    /// applies when a DID is absent
    pub payload_lengths: HashMap<(u16, u16), usize>,
    /// Fallback payload length
    pub default_payload_len: usize,
    /// DIDs that never answer
    pub silent: HashSet<(u16, u16)>,
    /// DIDs that force a negative response for the whole batch
    pub negative: HashMap<(u16, u16), ResponseCode>,
    /// Fixed payload bytes per (server, did); generated values otherwise
    pub fixed_values: HashMap<(u16, u16), Vec<u8>>,
}

struct Loopback {
    config: LoopbackConfig,
    queue: StdMutex<VecDeque<DiagFrame>>,
    arrival: Notify,
    counter: AtomicU64,
}

impl UdsTransport {
    /// Connect to a DoIP gateway over TCP
    pub async fn connect(addr: &str) -> Result<Self, UdsError> {
        info!("Connecting to DoIP gateway at {}", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            inner: Inner::Tcp(TcpTransport {
                reader: Mutex::new(reader),
                writer: Mutex::new(writer),
            }),
        })
    }

    /// Create a loopback transport that answers synthetically
    pub fn loopback(config: LoopbackConfig) -> Self {
        info!("Creating loopback transport");
        Self {
            inner: Inner::Loopback(Loopback {
                config,
                queue: StdMutex::new(VecDeque::new()),
                arrival: Notify::new(),
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// Send a diagnostic request without waiting for the reply
    pub async fn send_no_response(
        &self,
        source: u16,
        target: u16,
        payload: &[u8],
    ) -> Result<(), UdsError> {
        match &self.inner {
            Inner::Tcp(tcp) => {
                let frame = doip::encode_diagnostic(source, target, payload);
                let mut writer = tcp.writer.lock().await;
                writer.write_all(&frame).await?;
                writer.flush().await?;
                Ok(())
            }
            Inner::Loopback(loopback) => loopback.answer(source, target, payload),
        }
    }

    /// Wait up to `wait` for the next diagnostic message
    ///
    /// Returns `Ok(None)` when no frame arrived within the window.
    /// Acknowledgement and status frames are consumed silently.
    pub async fn receive_frame(&self, wait: Duration) -> Result<Option<DiagFrame>, UdsError> {
        match &self.inner {
            Inner::Tcp(tcp) => tcp.receive(wait).await,
            Inner::Loopback(loopback) => loopback.receive(wait).await,
        }
    }

    /// Push a raw frame into the receive queue (loopback only)
    ///
    /// Lets tests exercise unmatched-response handling. A no-op on TCP.
    pub fn inject_frame(&self, frame: DiagFrame) {
        match &self.inner {
            Inner::Loopback(loopback) => loopback.push(frame),
            Inner::Tcp(_) => warn!("inject_frame ignored on TCP transport"),
        }
    }
}

impl TcpTransport {
    async fn receive(&self, wait: Duration) -> Result<Option<DiagFrame>, UdsError> {
        let deadline = Instant::now() + wait;
        let mut reader = self.reader.lock().await;

        loop {
            let mut header = [0u8; 8];
            // Only the idle wait before a header is bounded; aborting a
            // partially-read frame would desynchronize the stream.
            match timeout(deadline.saturating_duration_since(Instant::now()), async {
                reader.read_exact(&mut header).await
            })
            .await
            {
                Err(_) => return Ok(None),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(UdsError::ConnectionClosed)
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(_)) => {}
            }

            let (payload_type, length) = doip::parse_header(&header)?;
            let mut body = vec![0u8; length];
            reader
                .read_exact(&mut body)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => UdsError::ConnectionClosed,
                    _ => UdsError::Io(e),
                })?;

            match doip::decode_payload(payload_type, &body)? {
                DoipPayload::Diagnostic(frame) => return Ok(Some(frame)),
                DoipPayload::Ack => debug!("DoIP diagnostic ack"),
                DoipPayload::Nack(code) => warn!("DoIP diagnostic nack: {:02X}", code),
                DoipPayload::Other(kind) => debug!("Ignoring DoIP payload type {:04X}", kind),
            }
        }
    }
}

impl Loopback {
    fn answer(&self, source: u16, target: u16, payload: &[u8]) -> Result<(), UdsError> {
        let Some((&sid, did_bytes)) = payload.split_first() else {
            return Err(UdsError::InvalidResponse("empty request".into()));
        };
        if sid != service::READ_DATA_BY_IDENTIFIER || did_bytes.len() % 2 != 0 {
            return Err(UdsError::InvalidResponse(format!(
                "loopback only answers ReadDataByIdentifier, got {sid:02X}"
            )));
        }

        let dids: Vec<u16> = did_bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        // A DID the server rejects poisons the whole multiplexed request
        if let Some(code) = dids
            .iter()
            .find_map(|did| self.config.negative.get(&(target, *did)))
        {
            self.push(DiagFrame {
                source: target,
                target: source,
                payload: vec![
                    service::NEGATIVE_RESPONSE,
                    service::READ_DATA_BY_IDENTIFIER,
                    code.as_byte(),
                ],
            });
            return Ok(());
        }

        let mut data = vec![service::READ_DATA_BY_IDENTIFIER_REPLY];
        let mut answered = 0;
        for did in dids {
            if self.config.silent.contains(&(target, did)) {
                continue;
            }
            data.extend_from_slice(&did.to_be_bytes());
            if let Some(fixed) = self.config.fixed_values.get(&(target, did)) {
                data.extend_from_slice(fixed);
            } else {
                let len = self
                    .config
                    .payload_lengths
                    .get(&(target, did))
                    .copied()
                    .unwrap_or(self.config.default_payload_len);
                let seed = self.counter.fetch_add(1, Ordering::Relaxed);
                data.extend((0..len).map(|i| (seed as u8).wrapping_add(i as u8)));
            }
            answered += 1;
        }

        if answered > 0 {
            self.push(DiagFrame {
                source: target,
                target: source,
                payload: data,
            });
        }
        Ok(())
    }

    fn push(&self, frame: DiagFrame) {
        self.queue
            .lock()
            .expect("loopback queue poisoned")
            .push_back(frame);
        self.arrival.notify_one();
    }

    async fn receive(&self, wait: Duration) -> Result<Option<DiagFrame>, UdsError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.arrival.notified();
            if let Some(frame) = self
                .queue
                .lock()
                .expect("loopback queue poisoned")
                .pop_front()
            {
                return Ok(Some(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_config(server: u16, dids: &[(u16, usize)]) -> LoopbackConfig {
        LoopbackConfig {
            payload_lengths: dids.iter().map(|&(did, len)| ((server, did), len)).collect(),
            default_payload_len: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_loopback_echoes_requested_dids() {
        let transport = UdsTransport::loopback(echo_config(0x1781, &[(0x1234, 3), (0x5678, 5)]));
        transport
            .send_no_response(0x0E80, 0x1781, &crate::read_data_by_identifier(&[0x1234, 0x5678]))
            .await
            .unwrap();

        let frame = transport
            .receive_frame(Duration::from_millis(100))
            .await
            .unwrap()
            .expect("frame expected");
        assert_eq!(frame.source, 0x1781);
        assert_eq!(frame.target, 0x0E80);
        assert_eq!(frame.payload[0], 0x62);
        // 1 service byte + (2 + 3) + (2 + 5)
        assert_eq!(frame.payload.len(), 13);
        assert_eq!(&frame.payload[1..3], &[0x12, 0x34]);
        assert_eq!(&frame.payload[6..8], &[0x56, 0x78]);
    }

    #[tokio::test]
    async fn test_loopback_silent_did_skipped() {
        let mut config = echo_config(0x1781, &[(0x1234, 2)]);
        config.silent.insert((0x1781, 0x5678));
        let transport = UdsTransport::loopback(config);
        transport
            .send_no_response(0x0E80, 0x1781, &crate::read_data_by_identifier(&[0x1234, 0x5678]))
            .await
            .unwrap();

        let frame = transport
            .receive_frame(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload.len(), 5);
    }

    #[tokio::test]
    async fn test_loopback_all_silent_means_no_frame() {
        let mut config = echo_config(0x1781, &[]);
        config.silent.insert((0x1781, 0x1234));
        let transport = UdsTransport::loopback(config);
        transport
            .send_no_response(0x0E80, 0x1781, &crate::read_data_by_identifier(&[0x1234]))
            .await
            .unwrap();

        let frame = transport
            .receive_frame(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_loopback_negative_poisons_batch() {
        let mut config = echo_config(0x1781, &[(0x1234, 2)]);
        config
            .negative
            .insert((0x1781, 0x5678), ResponseCode::RequestOutOfRange);
        let transport = UdsTransport::loopback(config);
        transport
            .send_no_response(0x0E80, 0x1781, &crate::read_data_by_identifier(&[0x1234, 0x5678]))
            .await
            .unwrap();

        let frame = transport
            .receive_frame(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload, vec![0x7F, 0x22, 0x31]);
    }

    #[tokio::test]
    async fn test_loopback_fixed_values() {
        let mut config = echo_config(0x1781, &[]);
        config
            .fixed_values
            .insert((0x1781, 0x0001), vec![0xAA, 0xBB]);
        let transport = UdsTransport::loopback(config);
        transport
            .send_no_response(0x0E80, 0x1781, &crate::read_data_by_identifier(&[0x0001]))
            .await
            .unwrap();

        let frame = transport
            .receive_frame(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload, vec![0x62, 0x00, 0x01, 0xAA, 0xBB]);
    }
}
