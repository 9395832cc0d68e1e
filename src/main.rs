use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ranspeed::{HttpProbe, SpeedTestEngine, TestConfig, TestEvent};

const START_DELAY: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = TestConfig::default();
    let mut address = config.default_address.clone();
    let mut use_balancer = config.use_balancer;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--direct" => use_balancer = false,
            "--balancer" => use_balancer = true,
            other => address = other.to_string(),
        }
    }

    let probe = Arc::new(HttpProbe::new(config.clone())?);
    let (engine, mut events) = SpeedTestEngine::new(probe, config);
    engine.start(use_balancer, &address, START_DELAY)?;

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                engine.stop();
                continue;
            }
        };

        match event {
            TestEvent::PingUpdate { millis } => println!("ping: {millis} ms"),
            TestEvent::DownloadStart => println!("download: starting"),
            TestEvent::DownloadSpeedUpdate { instant, .. } => {
                println!("download: {instant} Mbps");
            }
            TestEvent::DownloadFinish { average, samples } => {
                println!(
                    "download: {average} Mbps average over {} samples",
                    samples.len()
                );
            }
            TestEvent::UploadStart => println!("upload: starting"),
            TestEvent::UploadSpeedUpdate { instant, .. } => {
                println!("upload: {instant} Mbps");
            }
            TestEvent::UploadFinish { average, samples } => {
                println!(
                    "upload: {average} Mbps average over {} samples",
                    samples.len()
                );
            }
            TestEvent::Finish => {
                println!("done");
                break;
            }
            TestEvent::Stop => {
                println!("stopped");
                break;
            }
            TestEvent::FatalError { message, cause } => {
                eprintln!("error: {message} ({cause})");
                break;
            }
        }
    }

    Ok(())
}
