use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sweep_plan::Waypoint;
use sweep_vehicle::{Vehicle, VehicleError};

use crate::cancellable;

/// Phases of the pull-based mission transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Clearing,
    CountSent,
    AwaitingItemRequest,
    ItemSent,
    AwaitingAck,
    Complete,
    Aborted,
}

/// Why an upload hard-aborted before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// The vehicle stopped requesting items within the bounded wait.
    #[error("timed out waiting for an item request")]
    RequestTimeout,

    /// The vehicle asked for an index other than the one awaited.
    /// Treated as a protocol violation rather than silently re-sending.
    #[error("out-of-order item request: expected {expected}, got {got}")]
    OutOfOrder { expected: u16, got: u16 },

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// Hard failure before all items were transferred. The mission must
    /// never be started after this.
    #[error("mission upload aborted after {items_sent} items: {reason}")]
    Aborted { items_sent: u16, reason: AbortReason },

    /// Soft failure: every item was sent but the final ack never came.
    /// The mission is possibly resident on the vehicle; the caller decides.
    #[error("mission possibly uploaded but unconfirmed ({items_sent} items sent)")]
    Unconfirmed { items_sent: u16 },

    #[error(transparent)]
    Vehicle(#[from] VehicleError),
}

/// Upload settings, `[timing]` subset.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Fire-and-forget clear has no ack contract; settle instead.
    pub clear_settle: Duration,
    /// Bounded wait for each item request.
    pub request_timeout: Duration,
    /// Bounded wait for the final ack.
    pub ack_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            clear_settle: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Transient per-upload state. Owned exclusively here, never shared.
struct UploadSession {
    expected_count: u16,
    next_seq: u16,
    phase: UploadPhase,
}

impl UploadSession {
    fn advance(&mut self, phase: UploadPhase) {
        debug!("upload: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// Request/acknowledge mission transfer state machine.
///
/// The vehicle pulls items one at a time, by index, in strictly increasing
/// order from 0. Any deviation aborts hard; only a missing final ack is a
/// soft failure. No item-level retry: an item is only ever sent for the
/// index currently awaited.
pub struct MissionUploader {
    cfg: UploadConfig,
}

impl MissionUploader {
    pub fn new(cfg: UploadConfig) -> Self {
        Self { cfg }
    }

    /// Transfer `items` to the vehicle. Returns the number of items sent
    /// (== `items.len()`) on confirmed completion.
    pub async fn upload<V: Vehicle>(
        &self,
        vehicle: &mut V,
        items: &[Waypoint],
        cancel: &CancellationToken,
    ) -> Result<u16, UploadError> {
        // Mission seq is a u16 on the wire.
        debug_assert!(
            items.len() <= u16::MAX as usize,
            "mission length {} exceeds wire limit",
            items.len()
        );
        let expected_count = items.len() as u16;
        let mut s = UploadSession {
            expected_count,
            next_seq: 0,
            phase: UploadPhase::Idle,
        };
        info!("upload: starting, {} items", expected_count);

        s.advance(UploadPhase::Clearing);
        vehicle.clear_mission().await?;
        if cancellable(cancel, tokio::time::sleep(self.cfg.clear_settle))
            .await
            .is_none()
        {
            return Err(self.abort(&mut s, AbortReason::Cancelled));
        }

        s.advance(UploadPhase::CountSent);
        vehicle.send_item_count(expected_count).await?;

        while s.next_seq < s.expected_count {
            s.advance(UploadPhase::AwaitingItemRequest);
            let req = match cancellable(cancel, vehicle.await_item_request(self.cfg.request_timeout))
                .await
            {
                None => return Err(self.abort(&mut s, AbortReason::Cancelled)),
                Some(res) => res?,
            };

            match req {
                None => {
                    // The vehicle went quiet mid-transfer.
                    return Err(self.abort(&mut s, AbortReason::RequestTimeout));
                }
                Some(seq) if seq != s.next_seq => {
                    let expected = s.next_seq;
                    return Err(self.abort(
                        &mut s,
                        AbortReason::OutOfOrder { expected, got: seq },
                    ));
                }
                Some(seq) => {
                    vehicle.send_item(&items[seq as usize]).await?;
                    s.advance(UploadPhase::ItemSent);
                    s.next_seq += 1;
                }
            }
        }

        s.advance(UploadPhase::AwaitingAck);
        let ack = match cancellable(cancel, vehicle.await_ack(self.cfg.ack_timeout)).await {
            None => return Err(self.abort(&mut s, AbortReason::Cancelled)),
            Some(res) => res?,
        };

        match ack {
            Some(ack) => {
                if !ack.accepted {
                    warn!("upload: vehicle ack reports rejection");
                }
                s.advance(UploadPhase::Complete);
                info!("upload: complete, {} items", s.next_seq);
                Ok(s.next_seq)
            }
            None => {
                // All items sent but unconfirmed; distinct from a hard abort.
                warn!("upload: no ack within {:?}", self.cfg.ack_timeout);
                debug_assert_eq!(s.next_seq, s.expected_count);
                Err(UploadError::Unconfirmed { items_sent: s.next_seq })
            }
        }
    }

    fn abort(&self, s: &mut UploadSession, reason: AbortReason) -> UploadError {
        warn!(
            "upload: aborted after {}/{} items: {}",
            s.next_seq, s.expected_count, reason
        );
        s.advance(UploadPhase::Aborted);
        UploadError::Aborted { items_sent: s.next_seq, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Call, FakeVehicle};
    use sweep_plan::{AreaSpec, CoveragePath, Origin};

    fn waypoints(legs: u32) -> Vec<Waypoint> {
        let area = AreaSpec {
            legs,
            leg_length_m: 10.0,
            spacing_m: 3.0,
            speed_mps: 1.0,
            altitude_m: 5.0,
        };
        CoveragePath::generate(&area).waypoints(&Origin { lat: 15.0, lon: 75.0 })
    }

    fn uploader() -> MissionUploader {
        MissionUploader::new(UploadConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn in_order_requests_reach_complete() {
        let items = waypoints(2); // 4 waypoints
        let mut v = FakeVehicle::new();
        for i in 0..4 {
            v.item_requests.push_back(Some(i));
        }
        v.acks.push_back(Some(sweep_vehicle::MissionAck { accepted: true }));

        let cancel = CancellationToken::new();
        let sent = uploader().upload(&mut v, &items, &cancel).await.unwrap();
        assert_eq!(sent, 4);

        // Every item sent exactly once, in index order, after clear + count.
        let sent_items: Vec<u16> = v
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::SendItem(seq) => Some(*seq),
                _ => None,
            })
            .collect();
        assert_eq!(sent_items, vec![0, 1, 2, 3]);
        assert_eq!(v.calls[0], Call::ClearMission);
        assert_eq!(v.calls[1], Call::SendCount(4));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_request_aborts_with_no_further_items() {
        let items = waypoints(2);
        let mut v = FakeVehicle::new();
        v.item_requests.push_back(Some(0));
        v.item_requests.push_back(Some(2)); // expected 1
        v.item_requests.push_back(Some(1)); // must never be consumed

        let cancel = CancellationToken::new();
        let err = uploader().upload(&mut v, &items, &cancel).await.unwrap_err();
        match err {
            UploadError::Aborted { items_sent, reason } => {
                assert_eq!(items_sent, 1);
                assert_eq!(reason, AbortReason::OutOfOrder { expected: 1, got: 2 });
            }
            other => panic!("expected hard abort, got {other:?}"),
        }

        let sent_items = v
            .calls
            .iter()
            .filter(|c| matches!(c, Call::SendItem(_)))
            .count();
        assert_eq!(sent_items, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_aborts_and_reports_progress() {
        let items = waypoints(2);
        let mut v = FakeVehicle::new();
        v.item_requests.push_back(Some(0));
        v.item_requests.push_back(Some(1));
        v.item_requests.push_back(None); // timeout waiting for seq 2

        let cancel = CancellationToken::new();
        let err = uploader().upload(&mut v, &items, &cancel).await.unwrap_err();
        match err {
            UploadError::Aborted { items_sent, reason } => {
                assert_eq!(items_sent, 2);
                assert_eq!(reason, AbortReason::RequestTimeout);
            }
            other => panic!("expected hard abort, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_is_soft_unconfirmed() {
        let items = waypoints(1); // 2 waypoints
        let mut v = FakeVehicle::new();
        v.item_requests.push_back(Some(0));
        v.item_requests.push_back(Some(1));
        v.acks.push_back(None); // ack timeout

        let cancel = CancellationToken::new();
        let err = uploader().upload(&mut v, &items, &cancel).await.unwrap_err();
        match err {
            UploadError::Unconfirmed { items_sent } => assert_eq!(items_sent, 2),
            other => panic!("expected soft fail, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "exceeds wire limit")]
    async fn oversized_mission_is_rejected() {
        let wp = Waypoint { seq: 0, lat: 15.0, lon: 75.0, alt_m: 5.0 };
        let items = vec![wp; u16::MAX as usize + 1];
        let mut v = FakeVehicle::new();
        let cancel = CancellationToken::new();
        let _ = uploader().upload(&mut v, &items, &cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_clear_settle_aborts() {
        let items = waypoints(1);
        let mut v = FakeVehicle::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = uploader().upload(&mut v, &items, &cancel).await.unwrap_err();
        match err {
            UploadError::Aborted { items_sent, reason } => {
                assert_eq!(items_sent, 0);
                assert_eq!(reason, AbortReason::Cancelled);
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(!v.calls.contains(&Call::SendCount(2)));
    }
}
