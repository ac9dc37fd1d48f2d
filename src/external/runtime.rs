/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The container runtime that backups are taken from and failed-over workloads are launched on.

use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    process::Command,
};

use crate::types::data_types::PortMapping;

use super::tool::{run_tool, ExternalToolError};

/// Reference to a container image, `name:tag`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Build the reference `name:tag`.
    pub fn tagged(name: &str, tag: impl Display) -> Self {
        Self(format!("{}:{}", name, tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ImageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How to launch a container from a recovered image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSpec {
    /// Name given to the launched container.
    pub container_name: String,

    /// Port the workload is published on.
    pub port_mapping: PortMapping,

    /// Command (and arguments) run inside the container. Empty means the image's default command.
    pub command: Vec<String>,
}

/// Operations on the container runtime that standby-rs depends on.
///
/// Every method either completes the operation or returns an error; implementations must never report
/// success for an operation that did not happen, since a silently failed commit or save corrupts the
/// version chain.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Capture the filesystem of the running container `container` as the image `image`.
    fn commit(&self, container: &str, image: &ImageRef) -> Result<(), ExternalToolError>;

    /// Write `image` as an archive to `dest`.
    fn save(&self, image: &ImageRef, dest: &Path) -> Result<(), ExternalToolError>;

    /// Load the image archive at `src` into the runtime, returning the reference it was loaded as.
    fn load(&self, src: &Path) -> Result<ImageRef, ExternalToolError>;

    /// Start a detached container from `image`.
    fn run(&self, image: &ImageRef, spec: &RunSpec) -> Result<(), ExternalToolError>;

    /// Remove `image` from the runtime's local image store.
    fn remove_image(&self, image: &ImageRef) -> Result<(), ExternalToolError>;
}

/// [`ContainerRuntime`] backed by the `docker` command-line client.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    binary: PathBuf,
}

impl DockerRuntime {
    /// Use the `docker` found on `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use the docker-compatible client at `binary`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for DockerRuntime {
    fn commit(&self, container: &str, image: &ImageRef) -> Result<(), ExternalToolError> {
        let mut command = self.command();
        command.arg("commit").arg(container).arg(image.as_str());
        run_tool(command).map(|_| ())
    }

    fn save(&self, image: &ImageRef, dest: &Path) -> Result<(), ExternalToolError> {
        let mut command = self.command();
        command.arg("save").arg("-o").arg(dest).arg(image.as_str());
        run_tool(command).map(|_| ())
    }

    fn load(&self, src: &Path) -> Result<ImageRef, ExternalToolError> {
        let mut command = self.command();
        command.arg("load").arg("--input").arg(src);
        let description = format!("docker load --input {}", src.display());
        let stdout = run_tool(command)?;
        parse_loaded_image(&stdout).ok_or(ExternalToolError::UnexpectedOutput {
            command: description,
            stdout,
        })
    }

    fn run(&self, image: &ImageRef, spec: &RunSpec) -> Result<(), ExternalToolError> {
        let mut command = self.command();
        command
            .arg("run")
            .arg("--detach")
            .arg("--name")
            .arg(&spec.container_name)
            .arg("-p")
            .arg(spec.port_mapping.to_string())
            .arg(image.as_str())
            .args(&spec.command);
        run_tool(command).map(|_| ())
    }

    fn remove_image(&self, image: &ImageRef) -> Result<(), ExternalToolError> {
        let mut command = self.command();
        command.arg("rmi").arg(image.as_str());
        run_tool(command).map(|_| ())
    }
}

/// Find the image reference in the output of `docker load`, which ends with a line like
/// `Loaded image: name:tag` (or `Loaded image ID: sha256:...` for untagged archives).
fn parse_loaded_image(stdout: &str) -> Option<ImageRef> {
    stdout.lines().rev().find_map(|line| {
        let line = line.trim();
        line.strip_prefix("Loaded image:")
            .or_else(|| line.strip_prefix("Loaded image ID:"))
            .map(|reference| ImageRef::new(reference.trim()))
            .filter(|reference| !reference.as_str().is_empty())
    })
}
