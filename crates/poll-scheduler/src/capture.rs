//! Capture / Distribute Pipeline
//!
//! One reader drains the transport for raw frames; one router matches
//! each frame to the slot whose in-flight batch expects it. Frames that
//! match no live slot are dropped; structural negative responses clear
//! their slot immediately instead of letting it ride out the timeout.

use crate::slot::SlotTable;
use crate::stats::SessionStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uds_protocol::{
    decode_response, did_from_bytes, service, DiagFrame, ResponseCode, UdsResponse, UdsTransport,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Continuously drain the transport while the session is active
///
/// Transport errors are logged and retried with exponential backoff;
/// a single failure never ends the session.
pub(crate) async fn capture_loop(
    transport: Arc<UdsTransport>,
    frame_tx: mpsc::Sender<DiagFrame>,
    read_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = stop.changed() => {}
            result = transport.receive_frame(read_timeout) => match result {
                Ok(Some(frame)) => {
                    backoff = INITIAL_BACKOFF;
                    if frame_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "transport read failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
    debug!("capture reader stopped");
}

/// Route captured frames to the matching in-flight slot
pub(crate) async fn distribute_loop(
    mut frame_rx: mpsc::Receiver<DiagFrame>,
    slots: Arc<SlotTable>,
    stats: Arc<SessionStats>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            maybe = frame_rx.recv() => {
                let Some(frame) = maybe else { break };
                route_frame(&slots, &stats, frame);
            }
        }
    }
    debug!("distributor stopped");
}

fn route_frame(slots: &SlotTable, stats: &SessionStats, frame: DiagFrame) {
    match decode_response(&frame.payload) {
        Ok(UdsResponse::Positive { service: sid, data })
            if sid == service::READ_DATA_BY_IDENTIFIER =>
        {
            let Some(did) = did_from_bytes(&data) else {
                debug!(server = frame.source, "positive response without identifier");
                return;
            };
            if !slots.deliver(frame.source, did, data) {
                stats.record_unmatched_frame();
            }
        }
        Ok(UdsResponse::Positive { service: sid, .. }) => {
            debug!(server = frame.source, service = sid, "response for other service dropped");
        }
        Ok(UdsResponse::Negative { code, .. }) => {
            if code.is_structural() {
                if !slots.fault(frame.source, code) {
                    stats.record_unmatched_frame();
                }
            } else if code == ResponseCode::ResponsePending {
                debug!(server = frame.source, "response pending, keeping slot alive");
            } else {
                debug!(server = frame.source, ?code, "negative response dropped");
            }
        }
        Err(e) => {
            debug!(server = frame.source, error = %e, "undecodable frame dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive_frame(server: u16, did: u16, payload: &[u8]) -> DiagFrame {
        let mut data = vec![0x62];
        data.extend_from_slice(&did.to_be_bytes());
        data.extend_from_slice(payload);
        DiagFrame {
            source: server,
            target: 0x0E80,
            payload: data,
        }
    }

    #[tokio::test]
    async fn test_route_positive_to_sent_slot() {
        let (table, mut inboxes) = SlotTable::new(1);
        let stats = SessionStats::new();
        table.assign(0, 0x1781, &[0x00FF]);
        table.mark_sent(0);

        route_frame(&table, &stats, positive_frame(0x1781, 0x00FF, &[1, 2, 3]));
        let delivery = inboxes[0].recv().await.unwrap();
        match delivery {
            crate::slot::Delivery::Payload(data) => {
                assert_eq!(data, vec![0x00, 0xFF, 1, 2, 3]);
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_frame_counted() {
        let (table, _inboxes) = SlotTable::new(1);
        let stats = SessionStats::new();
        route_frame(&table, &stats, positive_frame(0x1999, 0x0001, &[0xAA]));
        assert_eq!(stats.snapshot().unmatched_frames, 1);
    }

    #[tokio::test]
    async fn test_structural_negative_faults_slot() {
        let (table, mut inboxes) = SlotTable::new(1);
        let stats = SessionStats::new();
        table.assign(0, 0x1781, &[0x0001]);
        table.mark_sent(0);

        route_frame(
            &table,
            &stats,
            DiagFrame {
                source: 0x1781,
                target: 0x0E80,
                payload: vec![0x7F, 0x22, 0x14],
            },
        );
        let delivery = inboxes[0].recv().await.unwrap();
        assert!(matches!(
            delivery,
            crate::slot::Delivery::Fault(ResponseCode::ResponseTooLong)
        ));
    }

    #[tokio::test]
    async fn test_response_pending_leaves_slot_alone() {
        let (table, mut inboxes) = SlotTable::new(1);
        let stats = SessionStats::new();
        table.assign(0, 0x1781, &[0x0001]);
        table.mark_sent(0);

        route_frame(
            &table,
            &stats,
            DiagFrame {
                source: 0x1781,
                target: 0x0E80,
                payload: vec![0x7F, 0x22, 0x78],
            },
        );
        assert!(inboxes[0].try_recv().is_err());
        assert!(table.is_sent(0));
    }
}
