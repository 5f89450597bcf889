//! Remote calendar output: event rendering, the CalDAV client, and the
//! drift-repair pass.

mod ics;
mod reconcile;
mod sink;

pub use ics::build_vcalendar;
pub use reconcile::{reconcile, ReconcileReport};
pub use sink::CaldavSink;

use crate::traits::CalendarKind;
use crate::types::AppointmentStatus;

/// Which calendar an appointment's current status routes it to.
pub fn kind_for_status(status: AppointmentStatus) -> Option<CalendarKind> {
    match status {
        AppointmentStatus::Auto | AppointmentStatus::Confirmed => Some(CalendarKind::Confirmed),
        AppointmentStatus::Suggested => Some(CalendarKind::Suggested),
        AppointmentStatus::Rejected | AppointmentStatus::Cancelled | AppointmentStatus::Skipped => {
            None
        }
    }
}
