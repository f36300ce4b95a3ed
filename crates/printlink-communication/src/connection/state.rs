//! Link state transitions and their entry actions

use super::shared::LinkCore;
use crate::protocol::gcode;
use printlink_core::{keys, LinkState, Notification, StateError};

impl LinkCore {
    /// Move to `target`, running its entry actions.
    ///
    /// Returns false, leaving the state alone, when the transition is not legal.
    pub(crate) fn set_state(&mut self, target: LinkState) -> bool {
        let from = self.state;
        if from == target {
            return true;
        }
        if !from.can_transition_to(target) {
            tracing::warn!("Ignoring invalid link transition {} -> {}", from, target);
            return false;
        }

        tracing::info!("Link state {} -> {}", from, target);
        self.state = target;
        self.enter(from, target);
        self.publish(Notification::StateChanged { from, to: target });
        true
    }

    /// Like [`LinkCore::set_state`], reporting an illegal transition as an error
    pub(crate) fn transition(&mut self, target: LinkState) -> Result<(), StateError> {
        if self.set_state(target) {
            Ok(())
        } else {
            Err(StateError::InvalidTransition {
                current: self.state.to_string(),
                requested: target.to_string(),
            })
        }
    }

    /// The handshake got an answer: queue the start-up commands and go live
    pub(crate) fn complete_handshake(&mut self) {
        let heaters_off = self.heater_off_lines();
        self.queue.lock().extend(heaters_off);
        self.set_state(LinkState::Connected);
        let connect_gcode = gcode::split_lines(&self.settings.get_string(keys::CONNECT_GCODE));
        self.queue.lock().extend(connect_gcode);
        tracing::info!("Connected to {}", self.port_name());
        self.publish(Notification::ConnectionSucceeded);
    }

    /// A connect attempt failed before the link came up
    pub(crate) fn connection_failed(&mut self, reason: &str) {
        tracing::error!("Connection failed: {}", reason);
        self.close_transport();
        if self.state == LinkState::Connecting {
            self.set_state(LinkState::FailedToConnect);
        }
        self.publish(Notification::ConnectionFailed {
            reason: reason.to_string(),
        });
    }

    /// The transport failed under an open link
    pub(crate) fn connection_lost(&mut self, reason: &str) {
        if self.state == LinkState::Connecting {
            self.connection_failed(reason);
            return;
        }
        if !self.state.is_connected() {
            self.close_transport();
            return;
        }
        tracing::error!("Connection lost: {}", reason);
        self.set_state(LinkState::ConnectionLost);
        self.close_transport();
        self.publish(Notification::ConnectionFailed {
            reason: reason.to_string(),
        });
    }

    fn enter(&mut self, from: LinkState, target: LinkState) {
        match target {
            LinkState::Connected if from == LinkState::Connecting => {
                let mut queue = self.queue.lock();
                queue.push_back("M115".to_string());
                queue.push_back("M114".to_string());
            }
            LinkState::Paused => {
                if from.is_printing() {
                    self.paused_from = Some(from);
                }
            }
            LinkState::Printing | LinkState::PrintingFromRemovableMedia => {
                self.paused_from = None;
            }
            LinkState::FinishedPrint => self.finish_print_task(),
            LinkState::Disconnected | LinkState::ConnectionLost => self.heaters_off_and_zero(),
            _ => {}
        }
    }

    fn finish_print_task(&mut self) {
        let Some(task) = self.print_task.as_mut() else {
            return;
        };
        if task.finalize() {
            let job_name = task.job_name.clone();
            tracing::info!("Print of {} finished", job_name);
            self.publish(Notification::PrintFinished { job_name });
        }
    }

    fn heaters_off_and_zero(&mut self) {
        if self.transport_is_open() {
            for line in self.heater_off_lines() {
                if let Err(e) = self.write_raw(&line) {
                    tracing::debug!("Could not turn heaters off: {}", e);
                    break;
                }
            }
        }

        self.temperatures.zero_targets();
        self.temperatures.zero_actuals();
        for index in 0..self.extruder_count() {
            self.publish(Notification::HotendTemperatureRead { index, value: 0.0 });
        }
        self.publish(Notification::BedTemperatureRead(0.0));
    }
}
