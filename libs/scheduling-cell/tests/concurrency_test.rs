// libs/scheduling-cell/tests/concurrency_test.rs
mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use futures::future::join_all;
use uuid::Uuid;

use scheduling_cell::{Booking, Recurrence, SchedulingError, SchedulingRepository, SlotRef};

use common::{date, spec, TestSetup};

async fn race_reservations(setup: &Arc<TestSetup>, slot_ref: SlotRef, contenders: usize) -> Vec<Result<Booking, SchedulingError>> {
    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let setup = Arc::clone(setup);
            tokio::spawn(async move {
                setup.scheduler.bookings.reserve(slot_ref, Uuid::new_v4()).await
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("reservation task panicked"))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_exactly_one_concurrent_reservation_wins() {
    for contenders in [1usize, 2, 8, 64] {
        let setup = Arc::new(TestSetup::new());
        let day = date(2025, 10, 22);
        let window = setup.scheduler.availability
            .create_window(setup.provider_id, spec(day, Recurrence::None, &[(8, 9)]))
            .await
            .unwrap();
        let slot_ref = SlotRef::new(window.id, day, 0);

        let results = race_reservations(&setup, slot_ref, contenders).await;

        let winners = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1, "{} contenders", contenders);
        for result in results.iter().filter(|result| result.is_err()) {
            assert_matches!(result, Err(SchedulingError::SlotAlreadyBooked(r)) if *r == slot_ref);
        }

        let report = setup.scheduler.consistency.check_window(window.id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.active_bookings, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_exactly_one_wins_on_recurring_occurrence() {
    let setup = Arc::new(TestSetup::new());
    let monday = date(2025, 10, 20);
    let window = setup.scheduler.availability
        .create_window(setup.provider_id, spec(monday, Recurrence::Weekly, &[(9, 10)]))
        .await
        .unwrap();
    let slot_ref = SlotRef::new(window.id, date(2025, 11, 17), 0);

    let results = race_reservations(&setup, slot_ref, 32).await;

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(setup.scheduler.consistency.check_window(window.id).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_different_slots_book_independently() {
    let setup = Arc::new(TestSetup::new());
    let day = date(2025, 10, 22);
    let window = setup.scheduler.availability
        .create_window(setup.provider_id, spec(day, Recurrence::Daily, &[(8, 9), (9, 10), (10, 11), (11, 12), (12, 13)]))
        .await
        .unwrap();

    let slot_refs: Vec<SlotRef> = (0..10)
        .flat_map(|offset| {
            let occurrence = day + chrono::Duration::days(offset);
            (0..5).map(move |index| SlotRef::new(window.id, occurrence, index))
        })
        .collect();

    let handles: Vec<_> = slot_refs
        .iter()
        .map(|&slot_ref| {
            let setup = Arc::clone(&setup);
            tokio::spawn(async move {
                setup.scheduler.bookings.reserve(slot_ref, Uuid::new_v4()).await
            })
        })
        .collect();

    for joined in join_all(handles).await {
        assert!(joined.unwrap().is_ok());
    }

    let report = setup.scheduler.consistency.check_window(window.id).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.active_bookings, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_cancellations_succeed_once() {
    let setup = Arc::new(TestSetup::new());
    let day = date(2025, 10, 22);
    let window = setup.scheduler.availability
        .create_window(setup.provider_id, spec(day, Recurrence::None, &[(8, 9)]))
        .await
        .unwrap();
    let holder = Uuid::new_v4();
    let booking = setup.scheduler.bookings
        .reserve(SlotRef::new(window.id, day, 0), holder)
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let setup = Arc::clone(&setup);
            tokio::spawn(async move { setup.scheduler.bookings.cancel(booking.id, holder).await })
        })
        .collect();

    let results: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    for result in results.iter().filter(|result| result.is_err()) {
        assert_matches!(result, Err(SchedulingError::BookingAlreadyCancelled(_)));
    }
    assert!(setup.scheduler.consistency.check_window(window.id).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_racing_reservation_never_orphans_booking() {
    for _ in 0..50 {
        let setup = Arc::new(TestSetup::new());
        let day = date(2025, 10, 22);
        let window = setup.scheduler.availability
            .create_window(setup.provider_id, spec(day, Recurrence::None, &[(8, 9)]))
            .await
            .unwrap();
        let slot_ref = SlotRef::new(window.id, day, 0);

        let reserver = {
            let setup = Arc::clone(&setup);
            tokio::spawn(async move { setup.scheduler.bookings.reserve(slot_ref, Uuid::new_v4()).await })
        };
        let deleter = {
            let setup = Arc::clone(&setup);
            tokio::spawn(async move { setup.scheduler.availability.delete_window(window.id).await })
        };

        let reserved = reserver.await.unwrap();
        let deleted = deleter.await.unwrap();

        assert!(!(reserved.is_ok() && deleted.is_ok()), "booking orphaned by delete");
        if reserved.is_ok() {
            assert_matches!(deleted, Err(SchedulingError::WindowHasActiveBookings { .. }));
            assert!(setup.scheduler.consistency.check_window(window.id).await.unwrap().is_consistent());
        }
        if deleted.is_ok() {
            // Claims backed out by the losing reservation never outlive the window
            assert_eq!(setup.repository.slot_record_count(), 0);
        }
        if let Err(e) = &reserved {
            assert!(!e.is_defect(), "unexpected defect: {}", e);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_update_racing_reservation_never_retimes_booking() {
    for _ in 0..50 {
        let setup = Arc::new(TestSetup::new());
        let day = date(2025, 10, 22);
        let window = setup.scheduler.availability
            .create_window(setup.provider_id, spec(day, Recurrence::None, &[(8, 9)]))
            .await
            .unwrap();
        let slot_ref = SlotRef::new(window.id, day, 0);

        let reserver = {
            let setup = Arc::clone(&setup);
            tokio::spawn(async move { setup.scheduler.bookings.reserve(slot_ref, Uuid::new_v4()).await })
        };
        let updater = {
            let setup = Arc::clone(&setup);
            tokio::spawn(async move {
                setup.scheduler.availability
                    .update_window(window.id, spec(day, Recurrence::None, &[(10, 11)]))
                    .await
            })
        };

        let reserved = reserver.await.unwrap();
        let updated = updater.await.unwrap();

        // Whichever side wins, a live booking always matches the stored template
        if let Ok(booking) = &reserved {
            let stored = setup.scheduler.availability.get_window(window.id).await.unwrap();
            let record = setup.repository.get_slot(&booking.slot_ref).await.unwrap().unwrap();
            assert_eq!(record.booking_ref, Some(booking.id));
            assert_eq!(record.interval(), stored.slots[0]);
            if updated.is_ok() {
                assert_eq!(stored.slots, spec(day, Recurrence::None, &[(10, 11)]).slots);
            } else {
                assert_matches!(updated, Err(SchedulingError::WindowHasActiveBookings { .. }));
            }
            assert!(setup.scheduler.consistency.check_window(window.id).await.unwrap().is_consistent());
        }
        if let Err(e) = &reserved {
            assert!(!e.is_defect(), "unexpected defect: {}", e);
        }
    }
}
