use log::info;
use std::time::Instant;
use xradio::config::{RXD_DESC_SIZE, TXD_DESC_SIZE};
use xradio::{DATA_FRAME_SIZE, DeviceConfig, RingConfig};

mod sim;
use sim::Simulation;

const FRAME_COUNT: u64 = 256;
const FRAME_SIZE: usize = 1500;

#[tokio::main]
async fn main() -> xradio::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = DeviceConfig::default()
        .with_rx_ring(RingConfig::new(8, DATA_FRAME_SIZE, RXD_DESC_SIZE))
        .with_tx_ring(RingConfig::new(8, DATA_FRAME_SIZE, TXD_DESC_SIZE))
        .with_tx_queues(4);

    info!("Sending {} frames of {} bytes...", FRAME_COUNT, FRAME_SIZE);
    let start = Instant::now();
    let report = Simulation::new(config, FRAME_SIZE).run(FRAME_COUNT).await?;
    let elapsed = start.elapsed();

    info!("=== Simulation Complete ===");
    info!("Frames: {} (delivered {}, failed {})", report.frames, report.delivered, report.failed);
    info!("Received: {}", report.received);
    info!("Beacons released: {}", report.beacons);
    info!("Completions handled: {}", report.completions);
    info!("Time: {:.2} seconds", elapsed.as_secs_f64());
    Ok(())
}
