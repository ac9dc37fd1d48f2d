/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and helpers that are used across multiple components of standby-rs.
//!
//! Types specific to a single component live next to that component, e.g., the server-side artifact
//! record in [`crate::transfer::server`].

pub mod data_types;

pub mod crypto_primitives;
