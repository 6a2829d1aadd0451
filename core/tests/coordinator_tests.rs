//! Integration tests for the order transaction coordinator
//!
//! Runs the full reserve-and-record protocol against the in-memory store and
//! queue from `orderdesk-testing`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use orderdesk_core::coordinator::{InvoiceJobStatus, OrderCoordinator};
use orderdesk_core::error::{OrderError, QueueError};
use orderdesk_core::queue::JobStatus;
use orderdesk_core::retry::RetryPolicy;
use orderdesk_core::store::OrderStore;
use orderdesk_core::types::{OrderId, ProductId, UserId};
use orderdesk_testing::fixtures::{customer, line, seed_catalogue};
use orderdesk_testing::{InMemoryJobQueue, InMemoryOrderStore, test_clock, test_clock_time};
use proptest::prelude::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    store: Arc<InMemoryOrderStore>,
    queue: Arc<InMemoryJobQueue>,
    coordinator: OrderCoordinator,
}

fn harness() -> Harness {
    let clock = Arc::new(test_clock());
    let store = Arc::new(InMemoryOrderStore::new(clock.clone()));
    seed_catalogue(&store);
    let queue = Arc::new(InMemoryJobQueue::new(RetryPolicy::default()).with_clock(clock.clone()));
    let coordinator = OrderCoordinator::new(store.clone(), queue.clone(), clock);
    Harness {
        store,
        queue,
        coordinator,
    }
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn two_line_order_totals_at_locked_prices() {
    let h = harness();

    let placement = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 2), line(2, 1)])
        .await
        .unwrap();

    assert_eq!(placement.order.total_amount, dec!(25.50));
    assert_eq!(placement.lines.len(), 2);
    assert_eq!(placement.lines[0].subtotal(), dec!(20.00));
    assert_eq!(placement.lines[1].subtotal(), dec!(5.50));

    assert_eq!(h.store.stock_of(ProductId::new(1)), Some(8));
    assert_eq!(h.store.stock_of(ProductId::new(2)), Some(9));
}

#[tokio::test]
async fn enqueues_exactly_one_job_after_commit() {
    let h = harness();

    let placement = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 1)])
        .await
        .unwrap();

    let InvoiceJobStatus::Queued(job_id) = placement.invoice_job else {
        panic!("expected queued job, got {:?}", placement.invoice_job);
    };
    assert_eq!(h.queue.status_of(job_id), Some(JobStatus::Pending));

    let jobs = h.queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].order_id, placement.order.id);
    assert_eq!(jobs[0].buyer_email, "user1@example.com");
    assert_eq!(jobs[0].timestamp, Some(test_clock_time()));
}

#[tokio::test]
async fn duplicate_lines_are_merged() {
    let h = harness();

    let placement = h
        .coordinator
        .place_order(&customer(1), vec![line(2, 1), line(1, 1), line(2, 2)])
        .await
        .unwrap();

    assert_eq!(placement.lines.len(), 2);
    assert_eq!(placement.lines[0].product_id, ProductId::new(2));
    assert_eq!(placement.lines[0].quantity, 3);
    assert_eq!(h.store.stock_of(ProductId::new(2)), Some(7));

    let committed = h.store.lines_of(placement.order.id);
    assert_eq!(committed, placement.lines);
    assert_eq!(committed[1].unit_price, dec!(10.00));
}

#[tokio::test]
async fn historical_orders_keep_their_price() {
    let h = harness();

    let placement = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 1)])
        .await
        .unwrap();
    h.store.set_price(ProductId::new(1), dec!(99.99));

    let detail = h.store.find_detail(placement.order.id).await.unwrap().unwrap();
    assert_eq!(detail.items[0].unit_price, dec!(10.00));
    assert_eq!(detail.order.total_amount, dec!(10.00));
    assert_eq!(detail.items_total(), detail.order.total_amount);
}

// ============================================================================
// Business-rule failures
// ============================================================================

#[tokio::test]
async fn missing_product_rolls_back_everything() {
    let h = harness();

    let err = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 2), line(42, 1)])
        .await
        .unwrap_err();

    assert_eq!(err, OrderError::ProductNotFound(ProductId::new(42)));
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.store.line_count(), 0);
    assert_eq!(h.store.stock_of(ProductId::new(1)), Some(10));
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn insufficient_stock_on_later_line_commits_nothing() {
    let h = harness();

    let err = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 3), line(2, 11)])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        OrderError::InsufficientStock {
            product_id: ProductId::new(2),
            available: 10,
            requested: 11,
        }
    );
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.store.stock_of(ProductId::new(1)), Some(10));
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn invalid_cart_never_opens_a_transaction() {
    let h = harness();
    h.store.set_unavailable(true);

    let err = h
        .coordinator
        .place_order(&customer(1), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Validation(_)));

    let err = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 0)])
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Validation(_)));
}

// ============================================================================
// Infrastructure failures
// ============================================================================

#[tokio::test]
async fn failed_commit_is_transaction_aborted() {
    let h = harness();
    h.store.fail_next_commit();

    let err = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 1)])
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::TransactionAborted(_)));
    assert!(err.is_retryable());
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.store.stock_of(ProductId::new(1)), Some(10));
    assert!(h.queue.is_empty());

    // Locks were released: the retry goes through.
    h.coordinator
        .place_order(&customer(1), vec![line(1, 1)])
        .await
        .unwrap();
}

#[tokio::test]
async fn unreachable_store_is_store_unavailable() {
    let h = harness();
    h.store.set_unavailable(true);

    let err = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::StoreUnavailable(_)));
}

#[tokio::test]
async fn unregistered_buyer_commits_nothing() {
    let h = harness();

    let err = h
        .coordinator
        .place_order(&customer(77), vec![line(1, 2)])
        .await
        .unwrap_err();

    assert_eq!(err, OrderError::UnknownBuyer(UserId::new(77)));
    assert!(err.is_client_error());
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.store.stock_of(ProductId::new(1)), Some(10));
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn enqueue_failure_keeps_the_committed_order() {
    let h = harness();
    h.queue.set_fail_enqueue(true);

    let placement = h
        .coordinator
        .place_order(&customer(1), vec![line(1, 4)])
        .await
        .unwrap();

    assert!(matches!(
        placement.invoice_job,
        InvoiceJobStatus::EnqueueFailed(QueueError::Unavailable(_))
    ));
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.store.stock_of(ProductId::new(1)), Some(6));
    assert!(h.queue.is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_buyers_racing_for_the_last_units() {
    let h = harness();
    h.store.add_product(ProductId::new(10), "Limited", dec!(1.00), 5);

    let a = {
        let c = h.coordinator.clone();
        tokio::spawn(async move { c.place_order(&customer(1), vec![line(10, 3)]).await })
    };
    let b = {
        let c = h.coordinator.clone();
        tokio::spawn(async move { c.place_order(&customer(2), vec![line(10, 3)]).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);

    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(
        *failure,
        OrderError::InsufficientStock {
            product_id: ProductId::new(10),
            available: 2,
            requested: 3,
        }
    );
    assert_eq!(h.store.stock_of(ProductId::new(10)), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_line_orders_do_not_deadlock() {
    let h = harness();

    let mut handles = Vec::new();
    for i in 0..20 {
        let c = h.coordinator.clone();
        let lines = if i % 2 == 0 {
            vec![line(1, 1), line(2, 1)]
        } else {
            vec![line(2, 1), line(1, 1)]
        };
        handles.push(tokio::spawn(async move {
            c.place_order(&customer(1), lines).await
        }));
    }

    let placed = tokio::time::timeout(Duration::from_secs(10), async {
        let mut placed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                placed += 1;
            }
        }
        placed
    })
    .await
    .expect("placements deadlocked");

    assert_eq!(placed, 10);
    assert_eq!(h.store.stock_of(ProductId::new(1)), Some(0));
    assert_eq!(h.store.stock_of(ProductId::new(2)), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_request_still_resolves_the_transaction() {
    let h = harness();

    let c = h.coordinator.clone();
    let request = tokio::spawn(async move { c.place_order(&customer(1), vec![line(1, 1)]).await });
    request.abort();
    let _ = request.await;

    // Whatever the abort interrupted, the product must be lockable again.
    let placement = tokio::time::timeout(
        Duration::from_secs(5),
        h.coordinator.place_order(&customer(2), vec![line(1, 1)]),
    )
    .await
    .expect("row lock leaked")
    .unwrap();
    assert!(placement.invoice_job.is_queued());

    // Let a detached placement finish its enqueue.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let committed = h.store.order_count();
    assert!(committed == 1 || committed == 2);
    assert_eq!(
        h.store.stock_of(ProductId::new(1)),
        Some(10 - u32::try_from(committed).unwrap())
    );
    assert_eq!(h.queue.len(), committed);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stock_never_goes_negative_and_totals_match(
        carts in prop::collection::vec(
            prop::collection::vec((1i64..=3, 1u32..=6), 1..4),
            1..12,
        )
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let h = harness();
            let initial: Vec<u32> = (1..=3)
                .map(|id| h.store.stock_of(ProductId::new(id)).unwrap())
                .collect();

            let mut handles = Vec::new();
            for cart in carts {
                let c = h.coordinator.clone();
                let lines = cart.into_iter().map(|(p, q)| line(p, q)).collect();
                handles.push(tokio::spawn(async move {
                    c.place_order(&customer(1), lines).await
                }));
            }

            let mut sold = [0u32; 3];
            for handle in handles {
                if let Ok(placement) = handle.await.unwrap() {
                    let total: rust_decimal::Decimal =
                        placement.lines.iter().map(|l| l.subtotal()).sum();
                    assert_eq!(total, placement.order.total_amount);
                    for l in &placement.lines {
                        let idx = usize::try_from(l.product_id.get() - 1).unwrap();
                        sold[idx] += l.quantity;
                    }
                }
            }

            for id in 1..=3i64 {
                let idx = usize::try_from(id - 1).unwrap();
                let left = h.store.stock_of(ProductId::new(id)).unwrap();
                assert_eq!(left, initial[idx] - sold[idx]);
            }
        });
    }
}

#[tokio::test]
async fn committed_orders_are_readable_by_id() {
    let h = harness();
    let placement = h
        .coordinator
        .place_order(&customer(2), vec![line(3, 7)])
        .await
        .unwrap();

    let detail = h.store.find_detail(placement.order.id).await.unwrap().unwrap();
    assert_eq!(detail.order.id, placement.order.id);
    assert_eq!(detail.items_total(), dec!(0.70));
    assert!(h.store.find_detail(OrderId::new(999)).await.unwrap().is_none());
}
