/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

#![allow(dead_code)]

pub(crate) mod diff;

pub(crate) mod fs;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod runtime;
