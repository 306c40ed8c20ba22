use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::models::{Appointment, ModificationWindow, SlotTime};

/// Patients may not edit an appointment inside this many hours of its start.
pub const MODIFICATION_CUTOFF_HOURS: f64 = 24.0;

/// Start of a slot in UTC. An undecided time of day counts from midnight.
pub fn slot_start(date: NaiveDate, time: SlotTime) -> DateTime<Utc> {
    let time_of_day = time.time().unwrap_or(NaiveTime::MIN);
    date.and_time(time_of_day).and_utc()
}

pub fn hours_until(appointment: &Appointment, now: DateTime<Utc>) -> f64 {
    let delta = slot_start(appointment.date, appointment.time) - now;
    delta.num_seconds() as f64 / 3600.0
}

/// Strictly more than 24 hours must remain; exactly 24 is already closed.
pub fn can_be_modified(appointment: &Appointment, now: DateTime<Utc>) -> bool {
    modification_window(appointment, now).can_be_modified
}

pub fn modification_window(appointment: &Appointment, now: DateTime<Utc>) -> ModificationWindow {
    let hours_until = hours_until(appointment, now);
    ModificationWindow {
        can_be_modified: hours_until > MODIFICATION_CUTOFF_HOURS,
        hours_until,
    }
}

/// Whether a proposed slot lies strictly after `now`. An undecided time
/// only needs a date that has not passed yet.
pub fn is_in_future(date: NaiveDate, time: SlotTime, now: DateTime<Utc>) -> bool {
    match time {
        SlotTime::Tbd => date >= now.date_naive(),
        SlotTime::At(_) => slot_start(date, time) > now,
    }
}
