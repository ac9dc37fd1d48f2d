/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Instant, SystemTime},
};

use crate::{
    config::{ClusterConfig, MonitorConfiguration, NodeEntry, TriggerMode},
    events::*,
    networking::{RecovererStub, Transport},
    types::data_types::{NodeId, Status},
};

/// Liveness bookkeeping of one monitored node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub recovery_target: NodeId,
    pub consecutive_failures: u32,
    /// Whether a recovery has been triggered in the node's current failure episode.
    pub recovery_triggered: bool,
}

/// What happened in one poll cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Nodes whose probe failed.
    pub failed: Vec<NodeId>,
    /// Nodes that answered after failing in an earlier cycle.
    pub recovered: Vec<NodeId>,
    /// `(failed node, recovery target)` pairs a recovery was successfully triggered for.
    pub triggered: Vec<(NodeId, NodeId)>,
}

pub struct HeartbeatMonitor<T: Transport> {
    nodes: Vec<NodeRecord>,
    stubs: Vec<RecovererStub<T>>,
    configuration: MonitorConfiguration,
    event_publisher: Option<Sender<Event>>,
}

impl<T: Transport> HeartbeatMonitor<T> {
    /// Monitor every node of `cluster`, reaching each through the transport `connect` returns for it.
    pub fn new(
        cluster: &ClusterConfig,
        mut connect: impl FnMut(&NodeEntry) -> T,
        configuration: MonitorConfiguration,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let nodes = cluster
            .nodes
            .iter()
            .map(|node| NodeRecord {
                id: node.id,
                recovery_target: node.recovery_target,
                consecutive_failures: 0,
                recovery_triggered: false,
            })
            .collect();
        let stubs = cluster
            .nodes
            .iter()
            .map(|node| RecovererStub::new(connect(node)))
            .collect();

        Self {
            nodes,
            stubs,
            configuration,
            event_publisher,
        }
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    /// Run one cycle: probe every node concurrently, update the failure counters once all probes have
    /// resolved, then trigger recoveries for the nodes at or above the failure threshold.
    pub fn poll_once(&mut self) -> CycleReport {
        let alive: Vec<bool> = thread::scope(|scope| {
            let probes: Vec<_> = self
                .stubs
                .iter_mut()
                .map(|stub| scope.spawn(move || matches!(stub.keep_alive(), Ok(Status::Ok))))
                .collect();
            probes
                .into_iter()
                .map(|probe| probe.join().unwrap_or(false))
                .collect()
        });

        let mut report = CycleReport::default();
        for (node, alive) in self.nodes.iter_mut().zip(alive) {
            if alive {
                if node.consecutive_failures > 0 {
                    report.recovered.push(node.id);
                    Event::NodeRecovered(NodeRecoveredEvent {
                        timestamp: SystemTime::now(),
                        node: node.id,
                    })
                    .publish(&self.event_publisher);
                }
                node.consecutive_failures = 0;
                node.recovery_triggered = false;
            } else {
                node.consecutive_failures += 1;
                report.failed.push(node.id);
                Event::ProbeFailure(ProbeFailureEvent {
                    timestamp: SystemTime::now(),
                    node: node.id,
                    consecutive_failures: node.consecutive_failures,
                })
                .publish(&self.event_publisher);
            }
        }

        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            if node.consecutive_failures < self.configuration.failure_threshold {
                continue;
            }
            let edge_triggered = self.configuration.trigger_mode == TriggerMode::EdgeTriggered;
            if edge_triggered && node.recovery_triggered {
                continue;
            }

            let (failed, target) = (node.id, node.recovery_target);
            let target_stub = match (target.int() as usize)
                .checked_sub(1)
                .and_then(|index| self.stubs.get_mut(index))
            {
                Some(stub) => stub,
                None => continue,
            };
            match target_stub.trigger_recovery(failed.artifact()) {
                Ok(Status::Ok) => {
                    self.nodes[i].recovery_triggered = true;
                    report.triggered.push((failed, target));
                    Event::TriggerRecovery(TriggerRecoveryEvent {
                        timestamp: SystemTime::now(),
                        node: failed,
                        target,
                    })
                    .publish(&self.event_publisher);
                }
                Ok(Status::NotReady) => log::warn!(
                    "Node {} refused to recover node {}",
                    target,
                    failed
                ),
                Err(err) => log::warn!(
                    "Failed to ask node {} to recover node {}: {:?}",
                    target,
                    failed,
                    err
                ),
            }
        }

        report
    }
}

impl<T: Transport + 'static> HeartbeatMonitor<T> {
    /// Start polling on a thread of its own, one cycle per configured interval, until a message is
    /// received on (or the sender of) `shutdown_signal` is dropped.
    pub fn start(mut self, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            let cycle_start = Instant::now();
            self.poll_once();

            let remaining = self
                .configuration
                .interval
                .saturating_sub(cycle_start.elapsed());
            match shutdown_signal.recv_timeout(remaining) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => (),
            }
        })
    }
}
