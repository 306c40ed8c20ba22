mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use tokio_test::{assert_err, assert_ok};

use appointment_cell::{
    AcceptAppointment, AppointmentChanges, AppointmentError, AppointmentStatus, RescheduleAction,
    RescheduleDecision, RescheduleProposal, SlotTime,
};
use notification_cell::{NotificationKind, NotificationStore};
use shared_models::auth::ActorRole;

use common::{at, date, hhmm, patient, provider, Harness};

#[tokio::test]
async fn booking_then_acceptance_blocks_the_slot() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, bob, dr) = (patient(), patient(), provider());

    let created = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap();
    assert_eq!(created.appointment.status, AppointmentStatus::Pending);
    assert_eq!(created.appointment.location, "TBD");
    assert!(created.notification_warning.is_none());
    assert_eq!(h.inbox_len(dr).await, 1);

    let accepted = h
        .machine
        .accept(dr, created.appointment.id, AcceptAppointment::default())
        .await
        .unwrap();
    assert_eq!(accepted.appointment.status, AppointmentStatus::Accepted);
    assert_eq!(h.inbox_len(alice).await, 1);

    let clash = h.book(bob, dr, date(2025, 6, 10), "09:00").await;
    assert_matches!(clash, Err(AppointmentError::SlotUnavailable { provider_id, .. }) if provider_id == dr.id);
}

#[tokio::test]
async fn approved_reschedule_moves_the_slot_and_notifies_the_patient_once() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let id = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment.id;
    h.machine.accept(dr, id, AcceptAppointment::default()).await.unwrap();
    h.machine.update_status(dr, id, AppointmentStatus::Scheduled).await.unwrap();

    // 48 hours before the appointment.
    h.clock.set(at(2025, 6, 8, 9, 0));
    let requested = h
        .machine
        .request_reschedule(
            alice,
            id,
            RescheduleProposal {
                date: date(2025, 6, 12),
                time: hhmm("10:00"),
                reason: "Travelling that week".to_string(),
            },
        )
        .await
        .unwrap()
        .appointment;
    assert_eq!(requested.status, AppointmentStatus::RescheduleRequested);
    let request = requested.reschedule_request.as_ref().unwrap();
    assert_eq!(request.requested_date, date(2025, 6, 12));
    assert_eq!(request.requested_time, hhmm("10:00"));

    let before = h.inbox_len(alice).await;
    let resolved = h
        .machine
        .resolve_reschedule(
            dr,
            id,
            RescheduleDecision {
                action: RescheduleAction::Approve,
                override_date: None,
                override_time: None,
            },
        )
        .await
        .unwrap()
        .appointment;

    assert_eq!(resolved.status, AppointmentStatus::Scheduled);
    assert_eq!(resolved.date, date(2025, 6, 12));
    assert_eq!(resolved.time, hhmm("10:00"));
    assert!(resolved.reschedule_request.is_none());

    assert_eq!(h.inbox_len(alice).await, before + 1);
    let latest = &h.inbox.list(alice.id, Default::default()).await.unwrap()[0];
    assert_eq!(latest.kind, NotificationKind::AppointmentRescheduleResolved);

    // The old slot is free again.
    assert_ok!(h.book(patient(), dr, date(2025, 6, 10), "09:00").await);
}

#[tokio::test]
async fn rejected_reschedule_reverts_to_scheduled() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let id = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment.id;
    h.machine.accept(dr, id, AcceptAppointment::default()).await.unwrap();
    h.machine.update_status(dr, id, AppointmentStatus::Scheduled).await.unwrap();
    h.machine
        .request_reschedule(
            alice,
            id,
            RescheduleProposal {
                date: date(2025, 6, 11),
                time: hhmm("15:30"),
                reason: "Clash with work".to_string(),
            },
        )
        .await
        .unwrap();

    // The requested slot is still reachable by others while negotiating.
    assert_ok!(h.book(patient(), dr, date(2025, 6, 11), "15:30").await);

    let reverted = h
        .machine
        .resolve_reschedule(
            dr,
            id,
            RescheduleDecision {
                action: RescheduleAction::Reject,
                override_date: None,
                override_time: None,
            },
        )
        .await
        .unwrap()
        .appointment;
    assert_eq!(reverted.status, AppointmentStatus::Scheduled);
    assert_eq!(reverted.date, date(2025, 6, 10));
    assert!(reverted.reschedule_request.is_none());
}

#[tokio::test]
async fn approval_into_a_taken_slot_fails_and_keeps_the_request() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let id = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment.id;
    h.machine.accept(dr, id, AcceptAppointment::default()).await.unwrap();
    h.machine.update_status(dr, id, AppointmentStatus::Scheduled).await.unwrap();
    h.machine
        .request_reschedule(
            alice,
            id,
            RescheduleProposal {
                date: date(2025, 6, 11),
                time: hhmm("15:30"),
                reason: "Clash with work".to_string(),
            },
        )
        .await
        .unwrap();
    h.book(patient(), dr, date(2025, 6, 11), "15:30").await.unwrap();

    let approve = RescheduleDecision {
        action: RescheduleAction::Approve,
        override_date: None,
        override_time: None,
    };
    assert_matches!(
        h.machine.resolve_reschedule(dr, id, approve).await,
        Err(AppointmentError::SlotUnavailable { .. })
    );

    let unchanged = h.machine.get(alice, id).await.unwrap();
    assert_eq!(unchanged.status, AppointmentStatus::RescheduleRequested);
    assert!(unchanged.reschedule_request.is_some());

    // The provider can still approve into a different slot.
    let with_override = RescheduleDecision {
        action: RescheduleAction::Approve,
        override_date: Some(date(2025, 6, 11)),
        override_time: Some(hhmm("16:00")),
    };
    let moved = h.machine.resolve_reschedule(dr, id, with_override).await.unwrap().appointment;
    assert_eq!(moved.time, hhmm("16:00"));
}

#[tokio::test]
async fn edits_inside_the_last_day_are_refused() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let id = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment.id;

    h.clock.set(at(2025, 6, 9, 23, 0));
    let changes = AppointmentChanges {
        reason: Some("Updated symptoms".to_string()),
        ..Default::default()
    };
    let result = h.machine.modify(alice, id, changes).await;
    assert_matches!(
        result,
        Err(AppointmentError::ModificationWindowClosed { hours_until }) if (hours_until - 10.0).abs() < 1e-9
    );

    let window = h.machine.modification_window(alice, id).await.unwrap();
    assert!(!window.can_be_modified);
}

#[tokio::test]
async fn window_closes_once_as_the_clock_moves() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let appointment = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment;

    h.clock.set(at(2025, 6, 9, 8, 59));
    assert!(h.machine.can_be_modified(&appointment));
    h.clock.advance(Duration::minutes(1));
    assert!(!h.machine.can_be_modified(&appointment));
    h.clock.advance(Duration::hours(30));
    assert!(!h.machine.can_be_modified(&appointment));
}

#[tokio::test]
async fn moving_an_accepted_appointment_needs_reconfirmation() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let id = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment.id;
    h.machine.accept(dr, id, AcceptAppointment::default()).await.unwrap();

    let moved = h
        .machine
        .modify(
            alice,
            id,
            AppointmentChanges {
                time: Some(hhmm("11:00")),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .appointment;
    assert_eq!(moved.status, AppointmentStatus::Pending);
    assert_eq!(moved.time, hhmm("11:00"));

    // Notes alone keep the status.
    let noted = h
        .machine
        .modify(
            alice,
            id,
            AppointmentChanges {
                patient_notes: Some("Bringing previous scans".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .appointment;
    assert_eq!(noted.status, AppointmentStatus::Pending);
    assert!(noted.updated_at >= moved.updated_at);
}

#[tokio::test]
async fn finished_appointments_reject_every_mutation() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());

    for terminal in [AppointmentStatus::Rejected, AppointmentStatus::Cancelled, AppointmentStatus::Completed] {
        let id = h.book(alice, dr, date(2025, 6, 20), "09:00").await.unwrap().appointment.id;
        match terminal {
            AppointmentStatus::Rejected => {
                h.machine.reject(dr, id, None).await.unwrap();
            }
            AppointmentStatus::Cancelled => {
                h.machine.update_status(alice, id, AppointmentStatus::Cancelled).await.unwrap();
            }
            _ => {
                h.machine.accept(dr, id, AcceptAppointment::default()).await.unwrap();
                h.machine.update_status(dr, id, AppointmentStatus::Completed).await.unwrap();
            }
        }

        assert_matches!(
            h.machine.update_status(dr, id, AppointmentStatus::Pending).await,
            Err(AppointmentError::AlreadyFinalized { current, .. }) if current == terminal
        );
        assert_matches!(
            h.machine
                .modify(alice, id, AppointmentChanges { reason: Some("x".into()), ..Default::default() })
                .await,
            Err(AppointmentError::AlreadyFinalized { .. })
        );
        assert_matches!(
            h.machine
                .request_reschedule(
                    alice,
                    id,
                    RescheduleProposal {
                        date: date(2025, 6, 21),
                        time: hhmm("09:00"),
                        reason: "Later".to_string(),
                    },
                )
                .await,
            Err(AppointmentError::AlreadyFinalized { .. })
        );
        assert_eq!(h.machine.get(alice, id).await.unwrap().status, terminal);
    }
}

#[tokio::test]
async fn illegal_moves_leave_the_record_untouched() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let appointment = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment;
    let id = appointment.id;

    let err = h
        .machine
        .update_status(alice, id, AppointmentStatus::Accepted)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        AppointmentError::InvalidTransition {
            from: AppointmentStatus::Pending,
            to: AppointmentStatus::Accepted,
            role: ActorRole::Patient,
        }
    );
    assert_err!(h.machine.update_status(dr, id, AppointmentStatus::Completed).await);
    assert_err!(h.machine.update_status(dr, id, AppointmentStatus::RescheduleRequested).await);

    let stored = h.machine.get(dr, id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Pending);
    assert_eq!(stored.version, appointment.version);
}

#[tokio::test]
async fn reschedule_requires_a_confirmed_slot() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let id = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment.id;

    let proposal = || RescheduleProposal {
        date: date(2025, 6, 12),
        time: hhmm("10:00"),
        reason: "Need a later day".to_string(),
    };
    assert_matches!(
        h.machine.request_reschedule(alice, id, proposal()).await,
        Err(AppointmentError::InvalidTransition {
            to: AppointmentStatus::RescheduleRequested,
            ..
        })
    );

    h.machine.accept(dr, id, AcceptAppointment::default()).await.unwrap();
    h.machine.update_status(dr, id, AppointmentStatus::Scheduled).await.unwrap();

    let tbd = RescheduleProposal {
        time: SlotTime::Tbd,
        ..proposal()
    };
    assert_matches!(
        h.machine.request_reschedule(alice, id, tbd).await,
        Err(AppointmentError::Validation(_))
    );
    assert_matches!(
        h.machine.update_status(dr, id, AppointmentStatus::Cancelled).await,
        Ok(_)
    );
}

#[tokio::test]
async fn roles_and_parties_are_enforced() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr, stranger) = (patient(), provider(), patient());
    let id = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment.id;

    assert_matches!(h.machine.get(stranger, id).await, Err(AppointmentError::Forbidden(_)));
    assert_matches!(
        h.machine.accept(alice, id, AcceptAppointment::default()).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        h.machine.create(dr, appointment_cell::NewAppointment {
            provider_id: dr.id,
            date: date(2025, 6, 11),
            time: hhmm("09:00"),
            location: None,
            kind: appointment_cell::AppointmentKind::Checkup,
            reason: "Self booking".to_string(),
            patient_notes: None,
        })
        .await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        h.machine.get(alice, uuid::Uuid::new_v4()).await,
        Err(AppointmentError::NotFound(_))
    );
}

#[tokio::test]
async fn bookings_must_be_in_the_future() {
    let h = Harness::new(at(2025, 6, 10, 9, 0));
    let (alice, dr) = (patient(), provider());

    assert_matches!(
        h.book(alice, dr, date(2025, 6, 10), "09:00").await,
        Err(AppointmentError::Validation(_))
    );
    assert_ok!(h.book(alice, dr, date(2025, 6, 10), "09:30").await);
}

#[tokio::test]
async fn acceptance_can_fix_a_tbd_slot() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, bob, dr) = (patient(), patient(), provider());
    let first = h.book(alice, dr, date(2025, 6, 10), "TBD").await.unwrap().appointment;
    let second = h.book(bob, dr, date(2025, 6, 11), "TBD").await.unwrap().appointment;

    let placed = h
        .machine
        .accept(
            dr,
            first.id,
            AcceptAppointment {
                time: Some(hhmm("14:00")),
                location: Some("Room 3".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .appointment;
    assert_eq!(placed.time, hhmm("14:00"));
    assert_eq!(placed.location, "Room 3");

    assert_matches!(
        h.machine
            .accept(
                dr,
                second.id,
                AcceptAppointment {
                    date: Some(date(2025, 6, 10)),
                    time: Some(hhmm("14:00")),
                    ..Default::default()
                },
            )
            .await,
        Err(AppointmentError::SlotUnavailable { .. })
    );

    assert_matches!(
        h.machine.update_status(dr, second.id, AppointmentStatus::Accepted).await,
        Ok(_)
    );
    assert_matches!(
        h.machine.update_status(dr, second.id, AppointmentStatus::Scheduled).await,
        Err(AppointmentError::Validation(_))
    );
}

#[tokio::test]
async fn one_undecided_booking_per_provider_and_day() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, bob, dr) = (patient(), patient(), provider());

    let first = assert_ok!(h.book(alice, dr, date(2025, 6, 10), "TBD").await);
    assert_eq!(first.appointment.status, AppointmentStatus::Pending);
    assert_matches!(
        h.book(bob, dr, date(2025, 6, 10), "TBD").await,
        Err(AppointmentError::SlotUnavailable { time: SlotTime::Tbd, .. })
    );
    assert_ok!(h.book(bob, dr, date(2025, 6, 11), "TBD").await);
    assert_ok!(h.book(bob, provider(), date(2025, 6, 10), "TBD").await);

    h.machine
        .update_status(alice, first.appointment.id, AppointmentStatus::Cancelled)
        .await
        .unwrap();
    assert_ok!(h.book(bob, dr, date(2025, 6, 10), "TBD").await);
}

#[tokio::test]
async fn cancelling_edit_keeps_the_original_slot() {
    let h = Harness::new(at(2025, 6, 1, 8, 0));
    let (alice, dr) = (patient(), provider());
    let booked = h.book(alice, dr, date(2025, 6, 10), "09:00").await.unwrap().appointment;

    let cancelled = h
        .machine
        .modify(
            alice,
            booked.id,
            AppointmentChanges {
                status: Some(AppointmentStatus::Cancelled),
                date: Some(date(2025, 5, 1)),
                time: Some(hhmm("07:00")),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .appointment;

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!((cancelled.date, cancelled.time), (booked.date, booked.time));
}
