/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Backs up a running container to its recovery node, one version after another.
//!
//! ```text
//! backup-driver <container id> <image name> <recover address> [artifact id]
//! ```

use std::{
    env, process,
    sync::{mpsc, Arc},
};

use log::LevelFilter;
use standby_rs::{
    config::{BackupDriverConfiguration, TransferClientConfiguration},
    event_bus::{start_event_bus, EventHandlers},
    external::{BsdiffEngine, ContainerRuntime, DiffEngine, DockerRuntime},
    logging,
    networking::{TcpTransport, TcpTransportConfiguration},
    retry::CancellationToken,
    snapshot::ContainerSnapshotSource,
    transfer::{BackupDriver, RetentionPolicy, TransferClient},
    types::data_types::ArtifactId,
};

const USAGE: &str = "usage: backup-driver <container id> <image name> <recover address> [artifact id]";
const DEFAULT_ARTIFACT_ID: u32 = 2;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 || args.len() > 5 {
        println!("{}", USAGE);
        return;
    }
    let (container, image_name, recover_addr) = (&args[1], &args[2], &args[3]);
    let artifact = match args.get(4).map(|arg| arg.parse::<u32>()) {
        None => DEFAULT_ARTIFACT_ID,
        Some(Ok(artifact)) => artifact,
        Some(Err(_)) => {
            println!("{}", USAGE);
            return;
        }
    };

    if let Err(err) = logging::init_stdout_logger(LevelFilter::Info) {
        eprintln!("Failed to set up logging: {}", err);
    }

    let (event_publisher, event_subscriber) = mpsc::channel();
    let (event_bus_shutdown, event_bus_shutdown_signal) = mpsc::channel();
    let event_bus = start_event_bus(
        EventHandlers::new(true),
        event_subscriber,
        event_bus_shutdown_signal,
    );

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new());
    let diff_engine: Arc<dyn DiffEngine> = Arc::new(BsdiffEngine::new());
    let source = match ContainerSnapshotSource::new(
        runtime,
        diff_engine,
        container.as_str(),
        image_name.as_str(),
        ".",
        RetentionPolicy::LATEST_ONLY,
    ) {
        Ok(source) => source,
        Err(err) => {
            log::error!("Failed to set up the snapshot source: {:?}", err);
            process::exit(1);
        }
    };

    let cancellation = CancellationToken::new();
    let client = TransferClient::new(
        TcpTransport::new(recover_addr.as_str(), TcpTransportConfiguration::default()),
        TransferClientConfiguration::builder()
            .artifact(ArtifactId::new(artifact))
            .build(),
        cancellation.clone(),
        Some(event_publisher),
    );
    let mut driver = BackupDriver::new(
        source,
        client,
        BackupDriverConfiguration::default(),
        cancellation,
    );

    let result = driver.run();
    drop(driver);
    let _ = event_bus_shutdown.send(());
    let _ = event_bus.join();

    match result {
        Ok(versions) => log::info!("Backed up {} versions", versions),
        Err(err) => {
            log::error!("Backup stopped: {:?}", err);
            process::exit(1);
        }
    }
}
