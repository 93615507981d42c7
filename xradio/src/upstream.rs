//! Interface towards the upper networking stack.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::frame::TxControl;
use crate::queue::TrafficClass;
use crate::transport::TransferStatus;

/// Binary transmit outcome reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// The frame went out.
    Success,
    /// The transfer failed; whether to retry is up to the upper stack.
    RetryableFailure,
}

impl From<TransferStatus> for TxOutcome {
    fn from(status: TransferStatus) -> Self {
        if status.is_success() {
            TxOutcome::Success
        } else {
            TxOutcome::RetryableFailure
        }
    }
}

/// Callbacks into the upper stack.
///
/// `report_tx_outcome` and `receive` run on the completion path with the
/// ring locked; they must not submit into the ring they report on.
/// `pause`, `resume` and `release_beacon` run with no ring locked.
pub trait Upstream: Send + Sync {
    /// Stop handing frames for `class`.
    fn pause(&self, class: TrafficClass);

    /// Frames for `class` can be submitted again.
    fn resume(&self, class: TrafficClass);

    /// A transmitted frame completed. `payload` excludes the descriptor.
    fn report_tx_outcome(&self, control: &TxControl, payload: &[u8], outcome: TxOutcome);

    /// The beacon of a finished guardian/beacon cycle is no longer needed.
    fn release_beacon(&self, control: TxControl);

    /// A receive transfer completed.
    fn receive(&self, data: &[u8], status: TransferStatus);
}

/// An event seen by [`RecordingUpstream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// [`Upstream::pause`].
    Pause(TrafficClass),
    /// [`Upstream::resume`].
    Resume(TrafficClass),
    /// [`Upstream::report_tx_outcome`].
    TxOutcome {
        /// Cookie of the reported frame.
        cookie: u64,
        /// Payload handed back, descriptor stripped.
        payload: Vec<u8>,
        /// Reported outcome.
        outcome: TxOutcome,
    },
    /// [`Upstream::release_beacon`] with the frame cookie.
    BeaconReleased(u64),
    /// [`Upstream::receive`] with the delivered bytes.
    Received(Vec<u8>),
}

/// Upstream that records every call.
#[derive(Debug, Default)]
pub struct RecordingUpstream {
    events: Mutex<Vec<UpstreamEvent>>,
}

impl RecordingUpstream {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UpstreamEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every recorded call in order.
    pub fn events(&self) -> Vec<UpstreamEvent> {
        self.lock().clone()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of pause calls for `class`.
    pub fn pauses(&self, class: TrafficClass) -> usize {
        self.count(|e| *e == UpstreamEvent::Pause(class))
    }

    /// Number of resume calls for `class`.
    pub fn resumes(&self, class: TrafficClass) -> usize {
        self.count(|e| *e == UpstreamEvent::Resume(class))
    }

    /// Number of released beacons.
    pub fn beacons_released(&self) -> usize {
        self.count(|e| matches!(e, UpstreamEvent::BeaconReleased(_)))
    }

    /// `(cookie, outcome)` of every transmit report in order.
    pub fn outcomes(&self) -> Vec<(u64, TxOutcome)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                UpstreamEvent::TxOutcome {
                    cookie, outcome, ..
                } => Some((*cookie, *outcome)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&UpstreamEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| pred(e)).count()
    }
}

impl Upstream for RecordingUpstream {
    fn pause(&self, class: TrafficClass) {
        self.lock().push(UpstreamEvent::Pause(class));
    }

    fn resume(&self, class: TrafficClass) {
        self.lock().push(UpstreamEvent::Resume(class));
    }

    fn report_tx_outcome(&self, control: &TxControl, payload: &[u8], outcome: TxOutcome) {
        self.lock().push(UpstreamEvent::TxOutcome {
            cookie: control.cookie,
            payload: payload.to_vec(),
            outcome,
        });
    }

    fn release_beacon(&self, control: TxControl) {
        self.lock().push(UpstreamEvent::BeaconReleased(control.cookie));
    }

    fn receive(&self, data: &[u8], status: TransferStatus) {
        if status.is_success() {
            self.lock().push(UpstreamEvent::Received(data.to_vec()));
        }
    }
}
