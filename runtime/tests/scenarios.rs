//! End-to-end walk through the waitlist promotion lifecycle.
//!
//! One event with three seats, three registered users and two on the
//! waitlist; each test picks up the story at a different step.

#![allow(clippy::unwrap_used)]

use chrono::TimeDelta;
use rollcall_core::error::RegistrationError;
use rollcall_core::ids::EventId;
use rollcall_core::registration::{CancelReason, Registration, RegistrationStatus};
use rollcall_testing::TestHarness;

struct Fixture {
    harness: TestHarness,
    event_id: EventId,
    registered: Vec<Registration>,
    u4: Registration,
    u5: Registration,
}

/// capacity=3, held=3, waitlist=[U4@1, U5@2]
async fn full_event_with_two_waiting() -> Fixture {
    let harness = TestHarness::new();
    let event_id = harness.publish_event(3).event_id;

    let mut registered = Vec::new();
    for _ in 0..3 {
        registered.push(harness.register(event_id).await.unwrap());
    }
    let u4 = harness.register(event_id).await.unwrap();
    let u5 = harness.register(event_id).await.unwrap();

    Fixture {
        harness,
        event_id,
        registered,
        u4,
        u5,
    }
}

async fn reload(harness: &TestHarness, registration: &Registration) -> Registration {
    harness.engine.get_registration(registration.id).await.unwrap()
}

#[tokio::test]
async fn setup_fills_seats_then_waitlists() {
    let f = full_event_with_two_waiting().await;

    assert!(
        f.registered
            .iter()
            .all(|r| r.status == RegistrationStatus::Registered)
    );
    assert_eq!(f.u4.status, RegistrationStatus::Waitlisted);
    assert_eq!(f.u4.waitlist_position, Some(1));
    assert_eq!(f.u5.waitlist_position, Some(2));

    let capacity = f.harness.engine.get_event_capacity(f.event_id).await.unwrap();
    assert_eq!(capacity.held_seats, 3);
    assert_eq!(capacity.waitlist_count, 2);
    assert!(capacity.is_full);
    f.harness.check_invariants(f.event_id).unwrap();
}

#[tokio::test]
async fn scenario_a_new_registration_joins_the_back_of_the_queue() {
    let f = full_event_with_two_waiting().await;

    let u6 = f.harness.register(f.event_id).await.unwrap();

    assert_eq!(u6.status, RegistrationStatus::Waitlisted);
    assert_eq!(u6.waitlist_position, Some(3));
    let capacity = f.harness.engine.get_event_capacity(f.event_id).await.unwrap();
    assert_eq!(capacity.waitlist_count, 3);
    assert_eq!(capacity.held_seats, 3);
    f.harness.check_invariants(f.event_id).unwrap();
}

#[tokio::test]
async fn scenario_b_cancellation_promotes_the_head() {
    let f = full_event_with_two_waiting().await;

    f.harness
        .engine
        .cancel_registration(f.registered[0].id)
        .await
        .unwrap();

    let cancelled = reload(&f.harness, &f.registered[0]).await;
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason, Some(CancelReason::UserCancelled));

    let u4 = reload(&f.harness, &f.u4).await;
    assert_eq!(u4.status, RegistrationStatus::PromotionPending);
    assert_eq!(u4.waitlist_position, None);
    assert_eq!(
        u4.promotion_deadline,
        Some(f.harness.clock.time() + TimeDelta::hours(24))
    );

    let u5 = reload(&f.harness, &f.u5).await;
    assert_eq!(u5.status, RegistrationStatus::Waitlisted);
    assert_eq!(u5.waitlist_position, Some(1));

    let capacity = f.harness.engine.get_event_capacity(f.event_id).await.unwrap();
    assert_eq!(capacity.held_seats, 3);
    assert_eq!(capacity.waitlist_count, 1);
    assert_eq!(capacity.pending_offers, 1);
    f.harness.check_invariants(f.event_id).unwrap();
}

#[tokio::test]
async fn scenario_c_decline_passes_the_offer_on() {
    let f = full_event_with_two_waiting().await;
    f.harness
        .engine
        .cancel_registration(f.registered[0].id)
        .await
        .unwrap();

    f.harness.engine.decline_promotion(f.u4.id).await.unwrap();

    let u4 = reload(&f.harness, &f.u4).await;
    assert_eq!(u4.status, RegistrationStatus::Cancelled);
    assert_eq!(u4.cancel_reason, Some(CancelReason::Declined));

    let u5 = reload(&f.harness, &f.u5).await;
    assert_eq!(u5.status, RegistrationStatus::PromotionPending);

    let capacity = f.harness.engine.get_event_capacity(f.event_id).await.unwrap();
    assert_eq!(capacity.waitlist_count, 0);
    assert_eq!(capacity.held_seats, 3);
    f.harness.check_invariants(f.event_id).unwrap();
}

#[tokio::test]
async fn scenario_d_sweep_expires_an_unanswered_offer() {
    let f = full_event_with_two_waiting().await;
    f.harness
        .engine
        .cancel_registration(f.registered[0].id)
        .await
        .unwrap();
    f.harness.engine.decline_promotion(f.u4.id).await.unwrap();

    f.harness
        .clock
        .advance(TimeDelta::hours(24) + TimeDelta::seconds(1));
    let report = f.harness.engine.sweep_expired_promotions().await.unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);

    let u5 = reload(&f.harness, &f.u5).await;
    assert_eq!(u5.status, RegistrationStatus::Cancelled);
    assert_eq!(u5.cancel_reason, Some(CancelReason::Expired));

    let capacity = f.harness.engine.get_event_capacity(f.event_id).await.unwrap();
    assert_eq!(capacity.held_seats, 2);
    assert_eq!(capacity.available_seats, 1);
    assert_eq!(capacity.waitlist_count, 0);
    f.harness.check_invariants(f.event_id).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_e_concurrent_cancels_of_one_record() {
    let f = full_event_with_two_waiting().await;
    let target = f.registered[0].id;

    let first = {
        let engine = f.harness.engine.clone();
        tokio::spawn(async move { engine.cancel_registration(target).await })
    };
    let second = {
        let engine = f.harness.engine.clone();
        tokio::spawn(async move { engine.cancel_registration(target).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "{results:?}");
    assert!(results.iter().any(|r| matches!(
        r,
        Err(RegistrationError::InvalidState {
            status: RegistrationStatus::Cancelled,
            ..
        })
    )));

    // Exactly one cascade: U4 holds the offer, U5 moved up but was not promoted.
    let u4 = reload(&f.harness, &f.u4).await;
    let u5 = reload(&f.harness, &f.u5).await;
    assert_eq!(u4.status, RegistrationStatus::PromotionPending);
    assert_eq!(u5.status, RegistrationStatus::Waitlisted);
    assert_eq!(u5.waitlist_position, Some(1));

    let promotions = f
        .harness
        .publisher
        .kinds()
        .into_iter()
        .filter(|kind| *kind == "RegistrationPromoted.v1")
        .count();
    assert_eq!(promotions, 1);
    f.harness.check_invariants(f.event_id).unwrap();
}
