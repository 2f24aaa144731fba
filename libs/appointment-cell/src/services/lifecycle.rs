use tracing::{debug, warn};

use crate::error::AppointmentError;
use crate::models::AppointmentStatus;

/// Result of checking a requested move against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The move is legal and should be written.
    Apply,
    /// The record is already in the requested state; nothing to write.
    AlreadyApplied,
}

/// Next states reachable from `current`. Terminal states have none.
pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
    match current {
        AppointmentStatus::Pending => &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
        AppointmentStatus::Confirmed => &[
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
            AppointmentStatus::NoShow,
        ],
        AppointmentStatus::Cancelled | AppointmentStatus::Completed | AppointmentStatus::NoShow => &[],
    }
}

pub fn check_transition(
    current: AppointmentStatus,
    target: AppointmentStatus,
) -> Result<Transition, AppointmentError> {
    if current == target {
        debug!("Appointment already {}, nothing to do", target);
        return Ok(Transition::AlreadyApplied);
    }

    if valid_transitions(current).contains(&target) {
        return Ok(Transition::Apply);
    }

    warn!("Rejected status transition {} -> {}", current, target);
    Err(AppointmentError::InvalidTransition { from: current, to: target })
}
