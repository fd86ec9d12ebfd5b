//! Polling watcher: one task per tracked intent

use super::{
    PollRequest, SettlementSource, WatcherCommand, WatcherId, WatcherSignal, WatcherSnapshot,
};
use crate::events::SettlementEvent;
use crate::stage::StagePlan;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Polls a settlement source for one intent until it reaches a terminal stage
///
/// The watcher publishes every report as a snapshot and sends the settlement
/// event to its tracker once per terminal outcome. After a terminal report it
/// stops polling and only waits for commands; an accepted retry resumes
/// polling. The task ends when the tracker drops the command sender.
pub struct PollingWatcher {
    id: WatcherId,
    request: PollRequest,
    plan: &'static StagePlan,
    source: Arc<dyn SettlementSource>,
    poll_interval: Duration,
    snapshots: watch::Sender<WatcherSnapshot>,
    commands: mpsc::UnboundedReceiver<WatcherCommand>,
    inbox: mpsc::UnboundedSender<WatcherSignal>,
    terminal: bool,
    settled: bool,
}

impl PollingWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WatcherId,
        request: PollRequest,
        plan: &'static StagePlan,
        source: Arc<dyn SettlementSource>,
        poll_interval: Duration,
        snapshots: watch::Sender<WatcherSnapshot>,
        commands: mpsc::UnboundedReceiver<WatcherCommand>,
        inbox: mpsc::UnboundedSender<WatcherSignal>,
    ) -> Self {
        Self {
            id,
            request,
            plan,
            source,
            poll_interval,
            snapshots,
            commands,
            inbox,
            terminal: false,
            settled: false,
        }
    }

    /// Main polling loop
    pub async fn run(mut self) {
        info!(
            watcher = %self.id,
            intent = %self.request.id,
            kind = %self.request.kind,
            "Watcher started"
        );

        loop {
            if !self.terminal {
                self.poll_once().await;
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = tokio::time::sleep(self.poll_interval), if !self.terminal => {}
            }
        }

        debug!(watcher = %self.id, intent = %self.request.id, "Watcher stopped");
    }

    async fn poll_once(&mut self) {
        crate::metrics::record_poll(self.request.kind);

        let report = match self.source.poll(&self.request).await {
            Ok(report) => report,
            Err(e) => {
                // Next poll after the interval; the projector absorbs the gap
                warn!(intent = %self.request.id, error = %e, "Settlement poll failed");
                crate::metrics::record_poll_failure(self.request.kind);
                return;
            }
        };

        debug!(
            intent = %self.request.id,
            stage = %report.stage.label(),
            terminal = report.terminal,
            "Polled settlement status"
        );

        self.terminal = report.terminal;
        self.snapshots.send_replace(report.snapshot());

        if !report.terminal || self.settled {
            return;
        }

        if let Some(event) = SettlementEvent::from_report(
            &self.request.id,
            &self.request.descriptor,
            self.plan,
            &report,
        ) {
            self.settled = true;
            let signal = WatcherSignal {
                watcher: self.id,
                event,
            };
            if self.inbox.send(signal).is_err() {
                debug!(intent = %self.request.id, "Tracker inbox closed, settlement not relayed");
            }
        }
    }

    async fn handle_command(&mut self, command: WatcherCommand) {
        match command {
            WatcherCommand::Event(tag) => {
                if !self.snapshots.borrow().can_accept(&tag) {
                    warn!(intent = %self.request.id, tag = %tag, "Event not accepted in current state");
                    return;
                }

                if tag != self.plan.retry_event {
                    debug!(intent = %self.request.id, tag = %tag, "No handler for event");
                    return;
                }

                match self.source.retry(&self.request).await {
                    Ok(()) => {
                        info!(intent = %self.request.id, "Intent re-driven");
                        self.terminal = false;
                        self.settled = false;
                    }
                    Err(e) => {
                        warn!(intent = %self.request.id, error = %e, "Retry failed");
                    }
                }
            }
        }
    }
}
