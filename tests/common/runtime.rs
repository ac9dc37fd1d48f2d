/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use standby_rs::external::{ContainerRuntime, ExternalToolError, ImageRef, RunSpec};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RuntimeCall {
    Commit { container: String, image: ImageRef },
    Save { image: ImageRef, dest: PathBuf },
    Load { src: PathBuf },
    Run { image: ImageRef, spec: RunSpec },
    RemoveImage { image: ImageRef },
}

/// An in-memory [`ContainerRuntime`]. The "container" is a byte vector that tests change between
/// commits; committed images are kept in a map, saved as plain files, and loaded back by file name.
#[derive(Default)]
pub(crate) struct FakeRuntime {
    container: Mutex<Vec<u8>>,
    images: Mutex<HashMap<ImageRef, Vec<u8>>>,
    calls: Mutex<Vec<RuntimeCall>>,
}

impl FakeRuntime {
    pub(crate) fn set_container(&self, bytes: Vec<u8>) {
        *self.container.lock().unwrap() = bytes;
    }

    pub(crate) fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn runs(&self) -> Vec<(ImageRef, RunSpec)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Run { image, spec } => Some((image, spec)),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` containers have been run, or `timeout` has passed.
    pub(crate) fn wait_for_runs(&self, count: usize, timeout: Duration) -> Vec<(ImageRef, RunSpec)> {
        let deadline = Instant::now() + timeout;
        loop {
            let runs = self.runs();
            if runs.len() >= count || Instant::now() >= deadline {
                return runs;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn commit(&self, container: &str, image: &ImageRef) -> Result<(), ExternalToolError> {
        let snapshot = self.container.lock().unwrap().clone();
        self.images.lock().unwrap().insert(image.clone(), snapshot);
        self.record(RuntimeCall::Commit {
            container: container.to_string(),
            image: image.clone(),
        });
        Ok(())
    }

    fn save(&self, image: &ImageRef, dest: &Path) -> Result<(), ExternalToolError> {
        let bytes = match self.images.lock().unwrap().get(image) {
            Some(bytes) => bytes.clone(),
            None => {
                return Err(ExternalToolError::Failed {
                    command: format!("save {}", image),
                    code: Some(1),
                    stderr: "No such image".to_string(),
                })
            }
        };
        fs::write(dest, bytes)?;
        self.record(RuntimeCall::Save {
            image: image.clone(),
            dest: dest.to_path_buf(),
        });
        Ok(())
    }

    fn load(&self, src: &Path) -> Result<ImageRef, ExternalToolError> {
        fs::metadata(src)?;
        self.record(RuntimeCall::Load {
            src: src.to_path_buf(),
        });
        let name = src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ImageRef::new(format!("loaded/{}", name)))
    }

    fn run(&self, image: &ImageRef, spec: &RunSpec) -> Result<(), ExternalToolError> {
        self.record(RuntimeCall::Run {
            image: image.clone(),
            spec: spec.clone(),
        });
        Ok(())
    }

    fn remove_image(&self, image: &ImageRef) -> Result<(), ExternalToolError> {
        self.images.lock().unwrap().remove(image);
        self.record(RuntimeCall::RemoveImage {
            image: image.clone(),
        });
        Ok(())
    }
}
