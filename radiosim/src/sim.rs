use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::*;
use tokio::sync::{Notify, oneshot};
use tokio::time::{interval, sleep, timeout};
use xradio::{
    Device, DeviceConfig, Dispatcher, Error, Frame, LoopbackUsb, PlainDescriptor, RingId,
    TrafficClass, TransferStatus, TxControl, TxOutcome, Upstream, completion_channel,
};

/// Every n-th transmit completes with an error.
const FAIL_EVERY: u64 = 7;

/// Every n-th tick delivers a received frame.
const RX_EVERY: u64 = 4;

/// A beacon update is attempted every n frames.
const BEACON_EVERY: u64 = 16;

/// Upper stack that logs and counts.
#[derive(Default)]
pub struct LoggingUpstream {
    delivered: AtomicU64,
    failed: AtomicU64,
    received: AtomicU64,
    beacons: AtomicU64,
    resumed: Notify,
}

impl LoggingUpstream {
    fn reported(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }
}

impl Upstream for LoggingUpstream {
    fn pause(&self, class: TrafficClass) {
        debug!("Queue {} paused", class);
    }

    fn resume(&self, class: TrafficClass) {
        debug!("Queue {} resumed", class);
        self.resumed.notify_one();
    }

    fn report_tx_outcome(&self, control: &TxControl, payload: &[u8], outcome: TxOutcome) {
        trace!("Frame {} ({} bytes): {:?}", control.cookie, payload.len(), outcome);
        match outcome {
            TxOutcome::Success => self.delivered.fetch_add(1, Ordering::Relaxed),
            TxOutcome::RetryableFailure => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn release_beacon(&self, control: TxControl) {
        trace!("Beacon {} released", control.cookie);
        self.beacons.fetch_add(1, Ordering::Relaxed);
    }

    fn receive(&self, data: &[u8], status: TransferStatus) {
        if status.is_success() {
            trace!("Received {} bytes", data.len());
            self.received.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
pub struct SimReport {
    pub frames: u64,
    pub delivered: u64,
    pub failed: u64,
    pub received: u64,
    pub beacons: u64,
    pub completions: u64,
}

pub struct Simulation {
    config: DeviceConfig,
    frame_size: usize,
}

impl Simulation {
    pub fn new(config: DeviceConfig, frame_size: usize) -> Self {
        Self { config, frame_size }
    }

    /// Pushes `frames` frames through a loopback radio and tears it down.
    pub async fn run(self, frames: u64) -> Result<SimReport, Error> {
        let (tx, rx) = completion_channel();
        let usb = Arc::new(LoopbackUsb::new(tx));
        let upstream = Arc::new(LoggingUpstream::default());
        let queues = self.config.tx_queues;
        let device = Arc::new(Device::new(
            self.config,
            usb.clone(),
            upstream.clone(),
            PlainDescriptor,
        )?);

        device.initialize()?;
        device.enable_radio()?;
        info!("Radio up with {} data queues", queues);

        let dispatcher = tokio::spawn(Dispatcher::new(&device, rx).run());
        let (stop_tx, stop_rx) = oneshot::channel();
        let air = tokio::spawn(Self::air(usb.clone(), queues, stop_rx));

        for n in 0..frames {
            let class = TrafficClass::Data((n % queues as u64) as u8);
            let frame = Frame::new(vec![n as u8; self.frame_size], TxControl::new(class, n));
            loop {
                match device.submit_frame(class, &frame) {
                    Ok(()) => break,
                    Err(err) if err.is_backpressure() => {
                        trace!("Frame {} waiting: {}", n, err);
                        let _ = timeout(Duration::from_millis(20), upstream.resumed.notified()).await;
                    }
                    Err(err) => return Err(err),
                }
            }

            if n % BEACON_EVERY == 0 {
                let beacon = Frame::new(vec![0x80; 64], TxControl::new(TrafficClass::Beacon, n));
                match device.update_beacon(&beacon) {
                    Ok(()) | Err(Error::BeaconPending) => {}
                    Err(err) => warn!("Beacon update failed: {}", err),
                }
            }
        }

        while upstream.reported() < frames {
            sleep(Duration::from_millis(1)).await;
        }
        let _ = stop_tx.send(());
        let _ = air.await;

        device.disable_radio()?;
        for id in device.ring_ids() {
            if let Some(stats) = device.stats(id) {
                info!(
                    "{}: submitted={} completed={} failed={} backpressure={} ignored={}",
                    id,
                    stats.submitted,
                    stats.completed,
                    stats.failed,
                    stats.backpressure,
                    stats.ignored
                );
            }
        }
        device.teardown();
        drop(device);
        drop(usb);

        let completions = dispatcher.await.unwrap_or_default();
        Ok(SimReport {
            frames,
            delivered: upstream.delivered.load(Ordering::Relaxed),
            failed: upstream.failed.load(Ordering::Relaxed),
            received: upstream.received.load(Ordering::Relaxed),
            beacons: upstream.beacons.load(Ordering::Relaxed),
            completions,
        })
    }

    /// Completes transfers on a fixed tick until told to stop.
    async fn air(usb: Arc<LoopbackUsb>, queues: usize, mut stop: oneshot::Receiver<()>) {
        let mut ticker = interval(Duration::from_millis(1));
        let mut tick: u64 = 0;
        let mut sent: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    tick += 1;
                    for prio in 0..queues {
                        sent += 1;
                        let status = if sent % FAIL_EVERY == 0 {
                            TransferStatus::Error(-71)
                        } else {
                            TransferStatus::Success
                        };
                        usb.complete_next(RingId::Tx(TrafficClass::Data(prio as u8)), status);
                    }
                    usb.complete_next(RingId::Tx(TrafficClass::Beacon), TransferStatus::Success);
                    if tick % RX_EVERY == 0 {
                        usb.receive(&tick.to_le_bytes());
                    }
                }
            }
        }
        debug!("Air stopped after {} ticks", tick);
    }
}
