/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them when creating
//! [`EventHandlers`](crate::event_bus::EventHandlers).
//!
//! standby-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations). The
//! binaries shipped with this crate use `fern`.
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CompleteTransfer](crate::events::CompleteTransferEvent) is printed:
//!
//! ```text
//! CompleteTransfer, 1701329264, 7, 1, q83vEjR
//! ```
//!
//! In the snippet:
//! - The third value is the artifact id.
//! - The fourth value is the version that became durable.
//! - The fifth value is the first seven characters of the Base64 encoding of the version's digest.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log::LevelFilter;
use std::{io, thread, time::SystemTime};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_TRANSFER: &str = "StartTransfer";
pub const REJECT_CHUNK: &str = "RejectChunk";
pub const COMPLETE_TRANSFER: &str = "CompleteTransfer";
pub const ABORT_TRANSFER: &str = "AbortTransfer";
pub const LAUNCH_RECOVERY: &str = "LaunchRecovery";

pub const ANNOUNCE_VERSION: &str = "AnnounceVersion";
pub const FILL_GAPS: &str = "FillGaps";
pub const CONFIRM_VERSION: &str = "ConfirmVersion";

pub const PROBE_FAILURE: &str = "ProbeFailure";
pub const NODE_RECOVERED: &str = "NodeRecovered";
pub const TRIGGER_RECOVERY: &str = "TriggerRecovery";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartTransferEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_transfer_event: &StartTransferEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                START_TRANSFER,
                secs_since_unix_epoch(start_transfer_event.timestamp),
                start_transfer_event.artifact,
                start_transfer_event.version,
                start_transfer_event.size,
                start_transfer_event.chunk_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectChunkEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_chunk_event: &RejectChunkEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}, {:?}",
                REJECT_CHUNK,
                secs_since_unix_epoch(reject_chunk_event.timestamp),
                reject_chunk_event.artifact,
                reject_chunk_event.version,
                reject_chunk_event.index,
                reject_chunk_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteTransferEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_transfer_event: &CompleteTransferEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMPLETE_TRANSFER,
                secs_since_unix_epoch(complete_transfer_event.timestamp),
                complete_transfer_event.artifact,
                complete_transfer_event.version,
                first_seven_base64_chars(&complete_transfer_event.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for AbortTransferEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |abort_transfer_event: &AbortTransferEvent| {
            log::error!(
                "{}, {}, {}, {}",
                ABORT_TRANSFER,
                secs_since_unix_epoch(abort_transfer_event.timestamp),
                abort_transfer_event.artifact,
                abort_transfer_event.version
            )
        };
        Box::new(logger)
    }
}

impl Logger for LaunchRecoveryEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |launch_recovery_event: &LaunchRecoveryEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                LAUNCH_RECOVERY,
                secs_since_unix_epoch(launch_recovery_event.timestamp),
                launch_recovery_event.artifact,
                launch_recovery_event.version,
                launch_recovery_event.image
            )
        };
        Box::new(logger)
    }
}

impl Logger for AnnounceVersionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |announce_version_event: &AnnounceVersionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                ANNOUNCE_VERSION,
                secs_since_unix_epoch(announce_version_event.timestamp),
                announce_version_event.artifact,
                announce_version_event.version,
                announce_version_event.size,
                announce_version_event.chunk_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for FillGapsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fill_gaps_event: &FillGapsEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                FILL_GAPS,
                secs_since_unix_epoch(fill_gaps_event.timestamp),
                fill_gaps_event.artifact,
                fill_gaps_event.version,
                fill_gaps_event.missing
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConfirmVersionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |confirm_version_event: &ConfirmVersionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CONFIRM_VERSION,
                secs_since_unix_epoch(confirm_version_event.timestamp),
                confirm_version_event.artifact,
                confirm_version_event.version
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProbeFailureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |probe_failure_event: &ProbeFailureEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                PROBE_FAILURE,
                secs_since_unix_epoch(probe_failure_event.timestamp),
                probe_failure_event.node,
                probe_failure_event.consecutive_failures
            )
        };
        Box::new(logger)
    }
}

impl Logger for NodeRecoveredEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |node_recovered_event: &NodeRecoveredEvent| {
            log::info!(
                "{}, {}, {}",
                NODE_RECOVERED,
                secs_since_unix_epoch(node_recovered_event.timestamp),
                node_recovered_event.node
            )
        };
        Box::new(logger)
    }
}

impl Logger for TriggerRecoveryEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |trigger_recovery_event: &TriggerRecoveryEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                TRIGGER_RECOVERY,
                secs_since_unix_epoch(trigger_recovery_event.timestamp),
                trigger_recovery_event.node,
                trigger_recovery_event.target
            )
        };
        Box::new(logger)
    }
}

/// Install a `fern` logger that prints every message at `level` and above to stdout, prefixed with the
/// emitting thread and the message's level.
pub fn init_stdout_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{:?}][{}] {}",
                thread::current().id(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
