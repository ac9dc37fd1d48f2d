/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Probes every node of a cluster file and fails over the nodes that stop answering.
//!
//! ```text
//! monitor [config path]
//! ```

use std::{env, path::Path, process, sync::mpsc, time::Duration};

use log::LevelFilter;
use standby_rs::{
    config::{ClusterConfig, MonitorConfiguration},
    event_bus::{start_event_bus, EventHandlers},
    heartbeat::HeartbeatMonitor,
    logging,
    networking::{TcpTransport, TcpTransportConfiguration},
};

const USAGE: &str = "usage: monitor [config path]";
const DEFAULT_CONFIG_PATH: &str = "config.txt";

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        println!("{}", USAGE);
        return;
    }
    let config_path = args
        .get(1)
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    if let Err(err) = logging::init_stdout_logger(LevelFilter::Info) {
        eprintln!("Failed to set up logging: {}", err);
    }

    let cluster = match ClusterConfig::load(Path::new(config_path)) {
        Ok(cluster) => cluster,
        Err(err) => {
            log::error!("Failed to read {}: {:?}", config_path, err);
            process::exit(1);
        }
    };

    let (event_publisher, event_subscriber) = mpsc::channel();
    let (_event_bus_shutdown, event_bus_shutdown_signal) = mpsc::channel();
    let _event_bus = start_event_bus(
        EventHandlers::new(true),
        event_subscriber,
        event_bus_shutdown_signal,
    );

    // Probes must resolve well within one monitoring interval.
    let probe_timeouts = TcpTransportConfiguration::builder()
        .connect_timeout(Duration::from_millis(500))
        .read_timeout(Duration::from_millis(500))
        .write_timeout(Duration::from_millis(500))
        .build();
    let monitor = HeartbeatMonitor::new(
        &cluster,
        |node| TcpTransport::new(node.address.as_str(), probe_timeouts),
        MonitorConfiguration::default(),
        Some(event_publisher),
    );
    log::info!("Monitoring {} nodes", cluster.nodes.len());

    let (_shutdown, shutdown_signal) = mpsc::channel();
    let _ = monitor.start(shutdown_signal).join();
}
