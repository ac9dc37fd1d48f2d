/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Launching the latest durable version of an artifact as a standby workload.
//!
//! A [`FailoverOrchestrator`] loads a full artifact into the container runtime and runs it with the
//! configured port mapping. Launches happen on a thread of their own so that the RPC that asked for
//! them returns immediately. Each `(artifact, version)` pair is launched at most once; if a launch
//! fails, the pair is forgotten so that a later trigger can retry it.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{mpsc::Sender, Arc, Mutex},
    thread::{self, JoinHandle},
    time::SystemTime,
};

use crate::{
    config::RecoveryConfiguration,
    events::{Event, LaunchRecoveryEvent},
    external::{ContainerRuntime, ExternalToolError, ImageRef, RunSpec},
    types::data_types::{ArtifactId, Version},
};

pub struct FailoverOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    configuration: RecoveryConfiguration,
    launched: Arc<Mutex<HashSet<(ArtifactId, Version)>>>,
    event_publisher: Option<Sender<Event>>,
}

impl FailoverOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        configuration: RecoveryConfiguration,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            runtime,
            configuration,
            launched: Arc::new(Mutex::new(HashSet::new())),
            event_publisher,
        }
    }

    /// Launch the full artifact at `image_path`, which holds `version` of `artifact`.
    ///
    /// Returns the handle of the launching thread, or `None` if this version has already been launched
    /// (or is being launched).
    pub fn recover(
        &self,
        artifact: ArtifactId,
        version: Version,
        image_path: PathBuf,
    ) -> Option<JoinHandle<()>> {
        if !self.launched.lock().unwrap().insert((artifact, version)) {
            log::debug!(
                "Recovery of artifact {} at version {} already launched",
                artifact,
                version
            );
            return None;
        }

        let runtime = Arc::clone(&self.runtime);
        let launched = Arc::clone(&self.launched);
        let event_publisher = self.event_publisher.clone();
        let run_spec = RunSpec {
            container_name: self.configuration.container_name.clone(),
            port_mapping: self.configuration.port_mapping,
            command: self.configuration.command.clone(),
        };

        Some(thread::spawn(move || {
            match launch(runtime.as_ref(), &image_path, &run_spec) {
                Ok(image) => Event::LaunchRecovery(LaunchRecoveryEvent {
                    timestamp: SystemTime::now(),
                    artifact,
                    version,
                    image,
                })
                .publish(&event_publisher),
                Err(err) => {
                    log::error!(
                        "Failed to launch artifact {} at version {}: {}",
                        artifact,
                        version,
                        err
                    );
                    launched.lock().unwrap().remove(&(artifact, version));
                }
            }
        }))
    }

    /// Whether `version` of `artifact` has been launched or is being launched.
    pub fn is_launched(&self, artifact: ArtifactId, version: Version) -> bool {
        self.launched.lock().unwrap().contains(&(artifact, version))
    }
}

fn launch(
    runtime: &dyn ContainerRuntime,
    image_path: &Path,
    run_spec: &RunSpec,
) -> Result<ImageRef, ExternalToolError> {
    let image = runtime.load(image_path)?;
    runtime.run(&image, run_spec)?;
    Ok(image)
}
