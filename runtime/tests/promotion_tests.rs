//! Cancellation, promotion offers and the expiry sweep.

#![allow(clippy::unwrap_used)]

use chrono::TimeDelta;
use rollcall_core::catalog::{CatalogEvent, EventStatus};
use rollcall_core::error::RegistrationError;
use rollcall_core::event::RegistrationEvent;
use rollcall_core::ids::{EventId, RegistrationId};
use rollcall_core::registration::{CancelReason, Registration, RegistrationStatus};
use rollcall_runtime::EngineConfig;
use rollcall_testing::{TestHarness, fast_retry_policy};

/// One seat, one holder and `waiting` users on the waitlist.
async fn one_seat(harness: &TestHarness, waiting: usize) -> (EventId, Registration, Vec<Registration>) {
    let event_id = harness.publish_event(1).event_id;
    let holder = harness.register(event_id).await.unwrap();
    let mut queue = Vec::new();
    for _ in 0..waiting {
        queue.push(harness.register(event_id).await.unwrap());
    }
    (event_id, holder, queue)
}

async fn status_of(harness: &TestHarness, id: RegistrationId) -> RegistrationStatus {
    harness.engine.get_registration(id).await.unwrap().status
}

#[tokio::test]
async fn unknown_registration_is_not_found() {
    let harness = TestHarness::new();
    let id = RegistrationId::new();

    assert_eq!(
        harness.engine.cancel_registration(id).await,
        Err(RegistrationError::RegistrationNotFound(id))
    );
    assert_eq!(
        harness.engine.accept_promotion(id).await,
        Err(RegistrationError::RegistrationNotFound(id))
    );
    assert_eq!(
        harness.engine.decline_promotion(id).await,
        Err(RegistrationError::RegistrationNotFound(id))
    );
}

#[tokio::test]
async fn cancelling_without_a_waitlist_frees_the_seat() {
    let harness = TestHarness::new();
    let (event_id, holder, _) = one_seat(&harness, 0).await;

    harness.engine.cancel_registration(holder.id).await.unwrap();

    let capacity = harness.engine.get_event_capacity(event_id).await.unwrap();
    assert_eq!(capacity.held_seats, 0);
    assert_eq!(capacity.available_seats, 1);
    assert_eq!(
        harness.publisher.kinds(),
        vec!["RegistrationCreated.v1", "RegistrationCancelled.v1"]
    );
}

#[tokio::test]
async fn cancelling_twice_is_invalid() {
    let harness = TestHarness::new();
    let (_, holder, _) = one_seat(&harness, 0).await;

    harness.engine.cancel_registration(holder.id).await.unwrap();
    let again = harness.engine.cancel_registration(holder.id).await;

    assert!(matches!(
        again,
        Err(RegistrationError::InvalidState {
            status: RegistrationStatus::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn cancelling_a_waitlisted_entry_closes_the_gap() {
    let harness = TestHarness::new();
    let (event_id, _, queue) = one_seat(&harness, 3).await;

    harness.engine.cancel_registration(queue[0].id).await.unwrap();

    let waitlist = harness.engine.waitlist(event_id).await.unwrap();
    let order: Vec<_> = waitlist.iter().map(|r| (r.id, r.waitlist_position)).collect();
    assert_eq!(order, vec![(queue[1].id, Some(1)), (queue[2].id, Some(2))]);

    let cancelled = harness.engine.get_registration(queue[0].id).await.unwrap();
    assert_eq!(cancelled.waitlist_position, None);
    assert_eq!(harness.store.capacity(event_id).unwrap().held_seats, 1);
    harness.check_invariants(event_id).unwrap();
}

#[tokio::test]
async fn cancelling_the_tail_leaves_earlier_positions_alone() {
    let harness = TestHarness::new();
    let (event_id, _, queue) = one_seat(&harness, 3).await;

    harness.engine.cancel_registration(queue[2].id).await.unwrap();

    let waitlist = harness.engine.waitlist(event_id).await.unwrap();
    assert_eq!(waitlist.len(), 2);
    assert_eq!(waitlist[0].id, queue[0].id);
    assert_eq!(waitlist[1].waitlist_position, Some(2));
    harness.check_invariants(event_id).unwrap();
}

#[tokio::test]
async fn accepting_an_offer_confirms_the_seat() {
    let harness = TestHarness::new();
    let (event_id, holder, queue) = one_seat(&harness, 1).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();

    let accepted = harness.engine.accept_promotion(queue[0].id).await.unwrap();

    assert_eq!(accepted.status, RegistrationStatus::Registered);
    assert_eq!(accepted.promotion_deadline, None);
    let capacity = harness.engine.get_event_capacity(event_id).await.unwrap();
    assert_eq!(capacity.held_seats, 1);
    assert_eq!(capacity.pending_offers, 0);
    assert_eq!(
        harness.publisher.kinds().last(),
        Some(&"PromotionAccepted.v1")
    );
    harness.check_invariants(event_id).unwrap();
}

#[tokio::test]
async fn accept_without_an_offer_is_invalid() {
    let harness = TestHarness::new();
    let (_, holder, queue) = one_seat(&harness, 1).await;

    for id in [holder.id, queue[0].id] {
        let result = harness.engine.accept_promotion(id).await;
        assert!(
            matches!(result, Err(RegistrationError::InvalidState { .. })),
            "{result:?}"
        );
    }
}

#[tokio::test]
async fn accept_on_the_deadline_still_succeeds() {
    let harness = TestHarness::new();
    let (_, holder, queue) = one_seat(&harness, 1).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();

    harness.clock.advance(TimeDelta::hours(24));
    let accepted = harness.engine.accept_promotion(queue[0].id).await.unwrap();

    assert_eq!(accepted.status, RegistrationStatus::Registered);
}

#[tokio::test]
async fn accept_after_the_deadline_is_expired() {
    let harness = TestHarness::new();
    let (event_id, holder, queue) = one_seat(&harness, 1).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();

    harness
        .clock
        .advance(TimeDelta::hours(24) + TimeDelta::milliseconds(1));
    let result = harness.engine.accept_promotion(queue[0].id).await;

    assert!(matches!(
        result,
        Err(RegistrationError::PromotionExpired { .. })
    ));
    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::PromotionPending
    );

    let report = harness.engine.sweep_expired_promotions().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::Cancelled
    );
    assert_eq!(harness.store.capacity(event_id).unwrap().held_seats, 0);
}

#[tokio::test]
async fn decline_after_the_deadline_is_expired() {
    let harness = TestHarness::new();
    let (_, holder, queue) = one_seat(&harness, 1).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();

    harness.clock.advance(TimeDelta::days(2));
    let result = harness.engine.decline_promotion(queue[0].id).await;

    assert!(matches!(
        result,
        Err(RegistrationError::PromotionExpired { .. })
    ));
}

#[tokio::test]
async fn cancelling_a_pending_offer_promotes_the_next_in_line() {
    let harness = TestHarness::new();
    let (event_id, holder, queue) = one_seat(&harness, 2).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();

    harness.engine.cancel_registration(queue[0].id).await.unwrap();

    let first = harness.engine.get_registration(queue[0].id).await.unwrap();
    assert_eq!(first.status, RegistrationStatus::Cancelled);
    assert_eq!(first.cancel_reason, Some(CancelReason::UserCancelled));
    assert_eq!(
        status_of(&harness, queue[1].id).await,
        RegistrationStatus::PromotionPending
    );
    harness.check_invariants(event_id).unwrap();
}

#[tokio::test]
async fn custom_promotion_window_sets_the_deadline() {
    let harness = TestHarness::with_config(
        EngineConfig::default()
            .with_retry_policy(fast_retry_policy())
            .with_promotion_window(TimeDelta::hours(2)),
    );
    let (_, holder, queue) = one_seat(&harness, 1).await;
    let now = harness.clock.time();

    harness.engine.cancel_registration(holder.id).await.unwrap();

    let offered = harness.engine.get_registration(queue[0].id).await.unwrap();
    assert_eq!(offered.promotion_deadline, Some(now + TimeDelta::hours(2)));
}

#[tokio::test]
async fn promoted_event_carries_the_deadline() {
    let harness = TestHarness::new();
    let (_, holder, queue) = one_seat(&harness, 1).await;

    harness.engine.cancel_registration(holder.id).await.unwrap();

    let promoted = harness
        .publisher
        .events()
        .into_iter()
        .find_map(|event| match event {
            RegistrationEvent::Promoted {
                registration_id,
                deadline,
                ..
            } => Some((registration_id, deadline)),
            _ => None,
        })
        .unwrap();
    assert_eq!(promoted.0, queue[0].id);
    assert_eq!(promoted.1, harness.clock.time() + TimeDelta::hours(24));
}

#[tokio::test]
async fn sweep_with_nothing_due_does_nothing() {
    let harness = TestHarness::new();
    let (_, holder, queue) = one_seat(&harness, 1).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();
    let commits = harness.store.commit_count();

    let report = harness.engine.sweep_expired_promotions().await.unwrap();

    assert_eq!(report.expired, 0);
    assert_eq!(harness.store.commit_count(), commits);
    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::PromotionPending
    );
}

#[tokio::test]
async fn sweep_cascades_through_a_chain_of_lapsed_offers() {
    let harness = TestHarness::new();
    let (event_id, holder, queue) = one_seat(&harness, 3).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();

    // Each sweep expires one offer and issues the next with a fresh deadline.
    for (index, waiting) in queue.iter().enumerate() {
        harness
            .clock
            .advance(TimeDelta::hours(24) + TimeDelta::seconds(1));
        let report = harness.engine.sweep_expired_promotions().await.unwrap();
        assert_eq!(report.expired, 1, "round {index}");
        assert_eq!(
            status_of(&harness, waiting.id).await,
            RegistrationStatus::Cancelled
        );
        harness.check_invariants(event_id).unwrap();
    }

    let capacity = harness.engine.get_event_capacity(event_id).await.unwrap();
    assert_eq!(capacity.held_seats, 0);
    assert_eq!(capacity.waitlist_count, 0);
}

#[tokio::test]
async fn sweep_processes_more_than_one_batch() {
    let harness = TestHarness::with_config(
        EngineConfig::default()
            .with_retry_policy(fast_retry_policy())
            .with_sweep_batch_size(2),
    );
    let mut offered = Vec::new();
    for _ in 0..5 {
        let (_, holder, queue) = one_seat(&harness, 1).await;
        harness.engine.cancel_registration(holder.id).await.unwrap();
        offered.push(queue[0].id);
    }

    harness.clock.advance(TimeDelta::days(2));
    let report = harness.engine.sweep_expired_promotions().await.unwrap();

    assert_eq!(report.expired, 5);
    for id in offered {
        assert_eq!(status_of(&harness, id).await, RegistrationStatus::Cancelled);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweeps_expire_each_offer_once() {
    let harness = TestHarness::new();
    let (event_id, holder, queue) = one_seat(&harness, 2).await;
    harness.engine.cancel_registration(holder.id).await.unwrap();
    harness
        .clock
        .advance(TimeDelta::hours(24) + TimeDelta::seconds(1));

    let sweeps = (0..3).map(|_| {
        let engine = harness.engine.clone();
        tokio::spawn(async move { engine.sweep_expired_promotions().await })
    });
    let expired: u64 = futures::future::join_all(sweeps)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().expired)
        .sum();

    assert_eq!(expired, 1);
    assert_eq!(
        status_of(&harness, queue[1].id).await,
        RegistrationStatus::PromotionPending
    );
    harness.check_invariants(event_id).unwrap();
}

/// One seat, one holder and `waiting` users queued, for an event whose end
/// time the test controls.
async fn one_seat_event(
    harness: &TestHarness,
    waiting: usize,
) -> (CatalogEvent, Registration, Vec<Registration>) {
    let event = harness.publish_event(1);
    let holder = harness.register(event.event_id).await.unwrap();
    let mut queue = Vec::new();
    for _ in 0..waiting {
        queue.push(harness.register(event.event_id).await.unwrap());
    }
    (event, holder, queue)
}

fn offers_made(harness: &TestHarness) -> usize {
    harness
        .publisher
        .kinds()
        .into_iter()
        .filter(|kind| *kind == "RegistrationPromoted.v1")
        .count()
}

#[tokio::test]
async fn expiry_after_the_event_ends_does_not_cascade() {
    let harness = TestHarness::new();
    let (event, holder, queue) = one_seat_event(&harness, 2).await;

    harness.clock.set(event.end_time - TimeDelta::hours(1));
    harness.engine.cancel_registration(holder.id).await.unwrap();
    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::PromotionPending
    );

    harness.clock.set(event.end_time + TimeDelta::hours(30));
    let report = harness.engine.sweep_expired_promotions().await.unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::Cancelled
    );
    assert_eq!(
        status_of(&harness, queue[1].id).await,
        RegistrationStatus::Waitlisted
    );
    assert_eq!(offers_made(&harness), 1);

    let capacity = harness.engine.get_event_capacity(event.event_id).await.unwrap();
    assert_eq!(capacity.held_seats, 0);
    assert_eq!(capacity.waitlist_count, 1);
    harness.check_invariants(event.event_id).unwrap();
}

#[tokio::test]
async fn accepting_after_the_event_ends_is_closed() {
    let harness = TestHarness::new();
    let (event, holder, queue) = one_seat_event(&harness, 1).await;

    harness.clock.set(event.end_time - TimeDelta::hours(1));
    harness.engine.cancel_registration(holder.id).await.unwrap();

    // The offer deadline is still ahead; the event is not
    harness.clock.set(event.end_time + TimeDelta::minutes(1));
    let result = harness.engine.accept_promotion(queue[0].id).await;

    assert!(
        matches!(
            result,
            Err(RegistrationError::RegistrationClosed { event_id, .. }) if event_id == event.event_id
        ),
        "{result:?}"
    );
    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::PromotionPending
    );
}

#[tokio::test]
async fn cancelling_after_the_event_ends_leaves_the_seat_free() {
    let harness = TestHarness::new();
    let (event, holder, queue) = one_seat_event(&harness, 1).await;

    harness.clock.set(event.end_time);
    harness.engine.cancel_registration(holder.id).await.unwrap();

    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::Waitlisted
    );
    assert_eq!(offers_made(&harness), 0);
    assert_eq!(harness.store.capacity(event.event_id).unwrap().held_seats, 0);
    harness.check_invariants(event.event_id).unwrap();
}

#[tokio::test]
async fn cancelled_events_stop_the_cascade() {
    let harness = TestHarness::new();
    let (event, holder, queue) = one_seat_event(&harness, 1).await;
    harness
        .catalog
        .set_status(event.event_id, EventStatus::Cancelled);

    harness.engine.cancel_registration(holder.id).await.unwrap();

    assert_eq!(
        status_of(&harness, queue[0].id).await,
        RegistrationStatus::Waitlisted
    );
    assert_eq!(offers_made(&harness), 0);
}
