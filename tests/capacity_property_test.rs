mod common;

use barangay_ledger::entities::reservation;
use barangay_ledger::services::availability::peak_usage;
use chrono::{DateTime, Duration, Utc};
use common::{at, TestApp};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Reserve { quantity: i32, start_slot: i64, slots: i64 },
    Approve(usize),
    Cancel(usize),
    Complete(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (1i32..4, 0i64..24, 1i64..8).prop_map(|(quantity, start_slot, slots)| Step::Reserve {
            quantity,
            start_slot,
            slots
        }),
        2 => (0usize..32).prop_map(Step::Approve),
        1 => (0usize..32).prop_map(Step::Cancel),
        1 => (0usize..32).prop_map(Step::Complete),
    ]
}

fn slot(base: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    base + Duration::minutes(n * 30)
}

fn load_at(reservations: &[reservation::Model], instant: DateTime<Utc>) -> i32 {
    reservations
        .iter()
        .filter(|r| r.status.is_active() && r.covers(instant))
        .map(|r| r.quantity)
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Random interleavings of requests and decisions never leave any instant over capacity.
    #[test]
    fn ledger_never_exceeds_capacity(max in 1i32..6, steps in prop::collection::vec(step(), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let app = TestApp::new().await;
            let item = app.seed_item("Chairs", max).await;
            let base = at(20, 6);
            let mut created: Vec<uuid::Uuid> = Vec::new();

            for step in steps {
                match step {
                    Step::Reserve { quantity, start_slot, slots } => {
                        let start = slot(base, start_slot);
                        let end = slot(start, slots);
                        if let Ok(r) = app.reserve(item.id, "resident", quantity, (start, end)).await {
                            created.push(r.id);
                        }
                    }
                    Step::Approve(i) if !created.is_empty() => {
                        let id = created[i % created.len()];
                        let _ = app.services().lifecycle.approve(id, "staff").await;
                    }
                    Step::Cancel(i) if !created.is_empty() => {
                        let id = created[i % created.len()];
                        let _ = app.services().lifecycle.cancel(id, "staff", "reshuffle").await;
                    }
                    Step::Complete(i) if !created.is_empty() => {
                        let id = created[i % created.len()];
                        let _ = app.services().lifecycle.complete(id, "staff").await;
                    }
                    _ => {}
                }

                let all = app.services().ledger.list_by_item(item.id).await.unwrap();
                for n in 0..64 {
                    assert!(load_at(&all, slot(base, n)) <= max);
                }
                assert!(peak_usage(&all, base, slot(base, 64)) <= max);

                let stored = app.services().inventory.get_item(item.id).await.unwrap();
                assert!(stored.available_quantity >= 0 && stored.available_quantity <= stored.max_quantity);
            }
        });
    }
}
