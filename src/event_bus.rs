/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives published [events](crate::events) and fires the handlers registered for them.
//!
//! ## Registering handlers
//!
//! ```ignore
//! let handlers = EventHandlers::new(true)
//!     .on_launch_recovery(|event| alert(event.artifact));
//! let (event_publisher, event_subscriber) = mpsc::channel();
//! let (shutdown, shutdown_signal) = mpsc::channel();
//! let event_bus = start_event_bus(handlers, event_subscriber, shutdown_signal);
//! ```

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The handlers fired for each kind of event.
#[derive(Default)]
pub struct EventHandlers {
    pub(crate) start_transfer_handlers: Vec<HandlerPtr<StartTransferEvent>>,
    pub(crate) reject_chunk_handlers: Vec<HandlerPtr<RejectChunkEvent>>,
    pub(crate) complete_transfer_handlers: Vec<HandlerPtr<CompleteTransferEvent>>,
    pub(crate) abort_transfer_handlers: Vec<HandlerPtr<AbortTransferEvent>>,
    pub(crate) launch_recovery_handlers: Vec<HandlerPtr<LaunchRecoveryEvent>>,
    pub(crate) announce_version_handlers: Vec<HandlerPtr<AnnounceVersionEvent>>,
    pub(crate) fill_gaps_handlers: Vec<HandlerPtr<FillGapsEvent>>,
    pub(crate) confirm_version_handlers: Vec<HandlerPtr<ConfirmVersionEvent>>,
    pub(crate) probe_failure_handlers: Vec<HandlerPtr<ProbeFailureEvent>>,
    pub(crate) node_recovered_handlers: Vec<HandlerPtr<NodeRecoveredEvent>>,
    pub(crate) trigger_recovery_handlers: Vec<HandlerPtr<TriggerRecoveryEvent>>,
}

impl EventHandlers {
    /// Create a set of handlers. If `log_events` is true, the default logger of every event type is
    /// registered.
    pub fn new(log_events: bool) -> Self {
        let mut handlers = Self::default();
        if log_events {
            handlers.start_transfer_handlers.push(StartTransferEvent::get_logger());
            handlers.reject_chunk_handlers.push(RejectChunkEvent::get_logger());
            handlers.complete_transfer_handlers.push(CompleteTransferEvent::get_logger());
            handlers.abort_transfer_handlers.push(AbortTransferEvent::get_logger());
            handlers.launch_recovery_handlers.push(LaunchRecoveryEvent::get_logger());
            handlers.announce_version_handlers.push(AnnounceVersionEvent::get_logger());
            handlers.fill_gaps_handlers.push(FillGapsEvent::get_logger());
            handlers.confirm_version_handlers.push(ConfirmVersionEvent::get_logger());
            handlers.probe_failure_handlers.push(ProbeFailureEvent::get_logger());
            handlers.node_recovered_handlers.push(NodeRecoveredEvent::get_logger());
            handlers.trigger_recovery_handlers.push(TriggerRecoveryEvent::get_logger());
        }
        handlers
    }

    pub fn on_complete_transfer(
        mut self,
        handler: impl Fn(&CompleteTransferEvent) + Send + 'static,
    ) -> Self {
        self.complete_transfer_handlers.push(Box::new(handler));
        self
    }

    pub fn on_abort_transfer(
        mut self,
        handler: impl Fn(&AbortTransferEvent) + Send + 'static,
    ) -> Self {
        self.abort_transfer_handlers.push(Box::new(handler));
        self
    }

    pub fn on_launch_recovery(
        mut self,
        handler: impl Fn(&LaunchRecoveryEvent) + Send + 'static,
    ) -> Self {
        self.launch_recovery_handlers.push(Box::new(handler));
        self
    }

    pub fn on_confirm_version(
        mut self,
        handler: impl Fn(&ConfirmVersionEvent) + Send + 'static,
    ) -> Self {
        self.confirm_version_handlers.push(Box::new(handler));
        self
    }

    pub fn on_trigger_recovery(
        mut self,
        handler: impl Fn(&TriggerRecoveryEvent) + Send + 'static,
    ) -> Self {
        self.trigger_recovery_handlers.push(Box::new(handler));
        self
    }

    pub fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartTransfer(start_transfer_event) => self
                .start_transfer_handlers
                .iter()
                .for_each(|handler| handler(&start_transfer_event)),

            Event::RejectChunk(reject_chunk_event) => self
                .reject_chunk_handlers
                .iter()
                .for_each(|handler| handler(&reject_chunk_event)),

            Event::CompleteTransfer(complete_transfer_event) => self
                .complete_transfer_handlers
                .iter()
                .for_each(|handler| handler(&complete_transfer_event)),

            Event::AbortTransfer(abort_transfer_event) => self
                .abort_transfer_handlers
                .iter()
                .for_each(|handler| handler(&abort_transfer_event)),

            Event::LaunchRecovery(launch_recovery_event) => self
                .launch_recovery_handlers
                .iter()
                .for_each(|handler| handler(&launch_recovery_event)),

            Event::AnnounceVersion(announce_version_event) => self
                .announce_version_handlers
                .iter()
                .for_each(|handler| handler(&announce_version_event)),

            Event::FillGaps(fill_gaps_event) => self
                .fill_gaps_handlers
                .iter()
                .for_each(|handler| handler(&fill_gaps_event)),

            Event::ConfirmVersion(confirm_version_event) => self
                .confirm_version_handlers
                .iter()
                .for_each(|handler| handler(&confirm_version_event)),

            Event::ProbeFailure(probe_failure_event) => self
                .probe_failure_handlers
                .iter()
                .for_each(|handler| handler(&probe_failure_event)),

            Event::NodeRecovered(node_recovered_event) => self
                .node_recovered_handlers
                .iter()
                .for_each(|handler| handler(&node_recovered_event)),

            Event::TriggerRecovery(trigger_recovery_event) => self
                .trigger_recovery_handlers
                .iter()
                .for_each(|handler| handler(&trigger_recovery_event)),
        }
    }
}

/// Start the event bus thread. It runs until a message is received on `shutdown_signal` or every
/// publisher of `event_subscriber` has been dropped.
pub fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
