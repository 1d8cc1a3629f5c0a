//! Check-in and no-show marking.

#![allow(clippy::unwrap_used)]

use chrono::TimeDelta;
use rollcall_core::catalog::CatalogEvent;
use rollcall_core::error::RegistrationError;
use rollcall_core::ids::EventId;
use rollcall_core::registration::RegistrationStatus;
use rollcall_testing::TestHarness;

/// Move the clock into the event's check-in window.
fn open_doors(harness: &TestHarness, event: &CatalogEvent) {
    harness.clock.set(event.start_time + TimeDelta::minutes(10));
}

/// Move the clock past the event's end.
fn after_event(harness: &TestHarness, event: &CatalogEvent) {
    harness.clock.set(event.end_time + TimeDelta::seconds(1));
}

#[tokio::test]
async fn valid_code_checks_the_attendee_in() {
    let harness = TestHarness::new();
    let event = harness.publish_event(5);
    let registration = harness.register(event.event_id).await.unwrap();
    open_doors(&harness, &event);

    let checked_in = harness
        .engine
        .check_in_attendee(registration.id, registration.qr_code.as_str())
        .await
        .unwrap();

    assert_eq!(checked_in.status, RegistrationStatus::Attended);
    assert_eq!(checked_in.attended_at, Some(harness.clock.time()));
    assert_eq!(
        harness.publisher.kinds().last(),
        Some(&"AttendeeCheckedIn.v1")
    );
    // Attendance keeps the seat.
    assert_eq!(harness.store.capacity(event.event_id).unwrap().held_seats, 1);
}

#[tokio::test]
async fn wrong_code_is_a_mismatch() {
    let harness = TestHarness::new();
    let event = harness.publish_event(5);
    let registration = harness.register(event.event_id).await.unwrap();
    open_doors(&harness, &event);

    let result = harness
        .engine
        .check_in_attendee(registration.id, "not-the-code")
        .await;

    assert_eq!(result, Err(RegistrationError::CheckInMismatch(registration.id)));
    let stored = harness.store.registration(registration.id).unwrap();
    assert_eq!(stored.status, RegistrationStatus::Registered);
}

#[tokio::test]
async fn check_in_outside_the_window_is_rejected() {
    let harness = TestHarness::new();
    let event = harness.publish_event(5);
    let registration = harness.register(event.event_id).await.unwrap();

    let early = harness
        .engine
        .check_in_attendee(registration.id, registration.qr_code.as_str())
        .await;
    assert_eq!(
        early,
        Err(RegistrationError::CheckInWindowClosed(event.event_id))
    );

    after_event(&harness, &event);
    let late = harness
        .engine
        .check_in_attendee(registration.id, registration.qr_code.as_str())
        .await;
    assert_eq!(
        late,
        Err(RegistrationError::CheckInWindowClosed(event.event_id))
    );
}

#[tokio::test]
async fn only_confirmed_seats_can_check_in() {
    let harness = TestHarness::new();
    let event = harness.publish_event(1);
    let holder = harness.register(event.event_id).await.unwrap();
    let waiting = harness.register(event.event_id).await.unwrap();
    open_doors(&harness, &event);

    let result = harness
        .engine
        .check_in_attendee(waiting.id, waiting.qr_code.as_str())
        .await;
    assert!(matches!(
        result,
        Err(RegistrationError::InvalidState {
            status: RegistrationStatus::Waitlisted,
            operation: "check_in",
            ..
        })
    ));

    harness
        .engine
        .check_in_attendee(holder.id, holder.qr_code.as_str())
        .await
        .unwrap();
    let twice = harness
        .engine
        .check_in_attendee(holder.id, holder.qr_code.as_str())
        .await;
    assert!(matches!(
        twice,
        Err(RegistrationError::InvalidState {
            status: RegistrationStatus::Attended,
            ..
        })
    ));
}

#[tokio::test]
async fn attended_registration_cannot_be_cancelled() {
    let harness = TestHarness::new();
    let event = harness.publish_event(1);
    let registration = harness.register(event.event_id).await.unwrap();
    open_doors(&harness, &event);
    harness
        .engine
        .check_in_attendee(registration.id, registration.qr_code.as_str())
        .await
        .unwrap();

    let result = harness.engine.cancel_registration(registration.id).await;

    assert!(matches!(
        result,
        Err(RegistrationError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn no_shows_are_marked_after_the_event() {
    let harness = TestHarness::new();
    let event = harness.publish_event(3);
    let attended = harness.register(event.event_id).await.unwrap();
    let absent = harness.register(event.event_id).await.unwrap();
    let cancelled = harness.register(event.event_id).await.unwrap();
    harness.engine.cancel_registration(cancelled.id).await.unwrap();

    open_doors(&harness, &event);
    harness
        .engine
        .check_in_attendee(attended.id, attended.qr_code.as_str())
        .await
        .unwrap();

    after_event(&harness, &event);
    let report = harness.engine.mark_no_shows(event.event_id).await.unwrap();

    assert_eq!(report.marked, 1);
    assert_eq!(report.failed, 0);
    let absent = harness.store.registration(absent.id).unwrap();
    assert_eq!(absent.status, RegistrationStatus::NoShow);
    assert_eq!(
        harness.store.registration(attended.id).unwrap().status,
        RegistrationStatus::Attended
    );
    assert_eq!(
        harness.store.registration(cancelled.id).unwrap().status,
        RegistrationStatus::Cancelled
    );
    assert_eq!(harness.publisher.kinds().last(), Some(&"AttendeeNoShow.v1"));
}

#[tokio::test]
async fn marking_no_shows_twice_marks_nothing_new() {
    let harness = TestHarness::new();
    let event = harness.publish_event(3);
    harness.register(event.event_id).await.unwrap();
    after_event(&harness, &event);

    let first = harness.engine.mark_no_shows(event.event_id).await.unwrap();
    let second = harness.engine.mark_no_shows(event.event_id).await.unwrap();

    assert_eq!(first.marked, 1);
    assert_eq!(second.marked, 0);
}

#[tokio::test]
async fn no_shows_before_the_event_ends_are_rejected() {
    let harness = TestHarness::new();
    let event = harness.publish_event(3);
    open_doors(&harness, &event);

    assert_eq!(
        harness.engine.mark_no_shows(event.event_id).await,
        Err(RegistrationError::CheckInWindowClosed(event.event_id))
    );

    let unknown = EventId::new();
    assert_eq!(
        harness.engine.mark_no_shows(unknown).await,
        Err(RegistrationError::EventNotFound(unknown))
    );
}

#[tokio::test]
async fn no_show_sweep_covers_every_event_that_ended_in_range() {
    let harness = TestHarness::new();
    let start = harness.clock.time();
    let first = harness.publish_event(2);
    let second = harness.publish_event(2);
    harness.register(first.event_id).await.unwrap();
    harness.register(second.event_id).await.unwrap();
    harness.register(second.event_id).await.unwrap();

    after_event(&harness, &first);
    let report = harness
        .engine
        .sweep_no_shows(start, harness.clock.time())
        .await
        .unwrap();

    assert_eq!(report.marked, 3);
    assert!(harness
        .store
        .registrations_for(second.event_id)
        .iter()
        .all(|r| r.status == RegistrationStatus::NoShow));
}
