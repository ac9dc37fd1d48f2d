/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable external collaborators: the container runtime and the binary diff engine.
//!
//! Both are traits so that the transfer and recovery logic never shells out directly. The provided
//! implementations invoke the `docker`, `bsdiff`, and `bspatch` command-line tools and check their exit
//! status.

pub mod diff;

pub mod runtime;

pub mod tool;

pub use diff::{BsdiffEngine, DiffEngine};
pub use runtime::{ContainerRuntime, DockerRuntime, ImageRef, RunSpec};
pub use tool::ExternalToolError;
