pub mod availability;
pub mod inventory;
pub mod lifecycle;
pub mod reservation_ledger;

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use validator::ValidationError;

use crate::db::{ItemLocks, RetryPolicy};
use crate::events::EventSender;

/// Services layer shared by the HTTP handlers. All four services share one set of
/// item locks so every item-scoped operation is serialized against the others.
#[derive(Clone)]
pub struct AppServices {
    pub inventory: Arc<inventory::InventoryService>,
    pub ledger: Arc<reservation_ledger::ReservationLedger>,
    pub availability: Arc<availability::AvailabilityService>,
    pub lifecycle: Arc<lifecycle::LifecycleManager>,
    pub locks: ItemLocks,
}

impl AppServices {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: EventSender, retry: RetryPolicy) -> Self {
        let locks = ItemLocks::new();

        let inventory = Arc::new(inventory::InventoryService::new(
            db_pool.clone(),
            event_sender.clone(),
            locks.clone(),
            retry,
        ));
        let ledger = Arc::new(reservation_ledger::ReservationLedger::new(
            db_pool.clone(),
            event_sender.clone(),
            locks.clone(),
            retry,
        ));
        let availability = Arc::new(availability::AvailabilityService::new(db_pool.clone()));
        let lifecycle = Arc::new(lifecycle::LifecycleManager::new(
            db_pool,
            event_sender,
            locks.clone(),
            retry,
        ));

        Self {
            inventory,
            ledger,
            availability,
            lifecycle,
            locks,
        }
    }
}

/// Rejects strings that are empty once trimmed.
pub(crate) fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}
