//! IDLE ⇄ ALARMING state machine driving the alarm.
//!
//! The machine keeps its own latched state instead of mirroring
//! `AlarmControl::is_playing()`: once an alarm auto-stops, the machine stays
//! ALARMING until a checked frame comes back clean, so a fire that is still
//! burning does not restart the siren every few frames. Only
//! `RetriggerPolicy::RefreshTimeout` restarts an active alarm.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alarm::AlarmControl;
use crate::ipc::events::AlertTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Idle,
    Alarming,
}

/// What a positive frame does while already ALARMING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetriggerPolicy {
    /// Keep the running session; its auto-stop deadline is unchanged.
    #[default]
    Suppress,
    /// Restart the session, pushing the auto-stop deadline out.
    RefreshTimeout,
}

#[derive(Debug)]
pub struct AlertStateMachine {
    state: AlertState,
    policy: RetriggerPolicy,
}

impl AlertStateMachine {
    pub fn new(policy: RetriggerPolicy) -> Self {
        Self {
            state: AlertState::Idle,
            policy,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn policy(&self) -> RetriggerPolicy {
        self.policy
    }

    /// Feed one frame. `None` means the frame was not checked.
    pub fn on_frame<T>(&mut self, checked: Option<&[T]>, alarm: &dyn AlarmControl) -> AlertTransition {
        match checked {
            None => AlertTransition::NoOp,
            Some(detections) => self.on_result(!detections.is_empty(), alarm),
        }
    }

    /// Feed the outcome of a checked frame.
    pub fn on_result(&mut self, positive: bool, alarm: &dyn AlarmControl) -> AlertTransition {
        match (self.state, positive) {
            (AlertState::Idle, false) => AlertTransition::NoOp,
            (AlertState::Idle, true) => match alarm.start() {
                Ok(()) => {
                    self.state = AlertState::Alarming;
                    info!("alert raised");
                    AlertTransition::Start
                }
                Err(e) => {
                    warn!("alert raised but alarm could not start: {e}");
                    AlertTransition::StartFailed
                }
            },
            (AlertState::Alarming, true) => match self.policy {
                RetriggerPolicy::Suppress => AlertTransition::NoOp,
                RetriggerPolicy::RefreshTimeout => match alarm.start() {
                    Ok(()) => AlertTransition::Refresh,
                    Err(e) => {
                        warn!("alarm refresh failed: {e}");
                        self.state = AlertState::Idle;
                        AlertTransition::StartFailed
                    }
                },
            },
            (AlertState::Alarming, false) => {
                alarm.stop();
                self.state = AlertState::Idle;
                info!("alert cleared");
                AlertTransition::Stop
            }
        }
    }

    /// Operator override: silence the alarm and return to IDLE.
    pub fn reset(&mut self, alarm: &dyn AlarmControl) -> AlertTransition {
        let was_alarming = self.state == AlertState::Alarming;
        alarm.stop();
        self.state = AlertState::Idle;
        if was_alarming {
            AlertTransition::Stop
        } else {
            AlertTransition::NoOp
        }
    }
}

impl Default for AlertStateMachine {
    fn default() -> Self {
        Self::new(RetriggerPolicy::default())
    }
}
