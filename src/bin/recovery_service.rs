/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Receives backup versions into the working directory and launches them on request.
//!
//! ```text
//! recovery-service <port>
//! ```

use std::{
    env, process,
    sync::{mpsc, Arc},
};

use log::LevelFilter;
use standby_rs::{
    config::TransferServerConfiguration,
    event_bus::{start_event_bus, EventHandlers},
    external::{BsdiffEngine, DockerRuntime},
    logging,
    networking::RpcServer,
    transfer::TransferServer,
};

const USAGE: &str = "usage: recovery-service <port>";

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        println!("{}", USAGE);
        return;
    }
    let port: u16 = match args[1].parse() {
        Ok(port) => port,
        Err(_) => {
            println!("{}", USAGE);
            return;
        }
    };

    if let Err(err) = logging::init_stdout_logger(LevelFilter::Info) {
        eprintln!("Failed to set up logging: {}", err);
    }

    let (event_publisher, event_subscriber) = mpsc::channel();
    let (_event_bus_shutdown, event_bus_shutdown_signal) = mpsc::channel();
    let _event_bus = start_event_bus(
        EventHandlers::new(true),
        event_subscriber,
        event_bus_shutdown_signal,
    );

    let server = match TransferServer::new(
        TransferServerConfiguration::builder().data_dir(".").build(),
        Arc::new(DockerRuntime::new()),
        Arc::new(BsdiffEngine::new()),
        Some(event_publisher),
    ) {
        Ok(server) => server,
        Err(err) => {
            log::error!("Failed to open the data directory: {}", err);
            process::exit(1);
        }
    };

    let (_shutdown, shutdown_signal) = mpsc::channel();
    let rpc_server = match RpcServer::bind(("0.0.0.0", port), Arc::new(server), shutdown_signal) {
        Ok(rpc_server) => rpc_server,
        Err(err) => {
            log::error!("Failed to listen on port {}: {}", port, err);
            process::exit(1);
        }
    };
    log::info!("Recovery service listening on port {}", port);

    let _ = rpc_server.start().join();
}
