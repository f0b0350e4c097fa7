//! Conflict & availability resolver
//!
//! Decides whether a quantity can be claimed over a half-open window given the
//! active reservations already recorded for an item. Capacity is always checked
//! against `max_quantity` instant by instant; `available_quantity` is only a
//! snapshot of "now" and is never consulted here.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::{item, reservation};
use crate::errors::ServiceError;
use crate::services::reservation_ledger;

/// Outcome of an availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Admissible,
    /// Ids of the reservations covering an over-capacity sub-interval, in window order.
    Conflict(Vec<Uuid>),
}

impl Availability {
    pub fn is_admissible(&self) -> bool {
        matches!(self, Availability::Admissible)
    }

    pub fn into_result(self) -> Result<(), ServiceError> {
        match self {
            Availability::Admissible => Ok(()),
            Availability::Conflict(ids) => Err(ServiceError::CapacityConflict(ids)),
        }
    }
}

/// A candidate claim on an item.
#[derive(Debug, Clone, Copy)]
pub struct CapacityRequest {
    pub quantity: i32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Reservation being re-evaluated, left out of the existing set.
    pub exclude: Option<Uuid>,
}

impl CapacityRequest {
    pub fn new(quantity: i32, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            quantity,
            window_start,
            window_end,
            exclude: None,
        }
    }

    pub fn excluding(mut self, reservation_id: Uuid) -> Self {
        self.exclude = Some(reservation_id);
        self
    }
}

/// Shape checks shared by reservation creation and availability queries.
pub fn validate_request(
    quantity: i32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    if window_start >= window_end {
        return Err(ServiceError::ValidationError(
            "window_start must be before window_end".to_string(),
        ));
    }
    Ok(())
}

/// Checks `request` against `existing` for an item holding `max_quantity` units.
///
/// Terminal reservations and the excluded id are ignored, so callers may pass the
/// item's full history.
pub fn resolve(
    existing: &[reservation::Model],
    max_quantity: i32,
    request: &CapacityRequest,
) -> Availability {
    if request.quantity > max_quantity {
        return Availability::Conflict(Vec::new());
    }

    let claims: Vec<&reservation::Model> = existing
        .iter()
        .filter(|r| r.status.is_active())
        .filter(|r| Some(r.id) != request.exclude)
        .filter(|r| r.overlaps(request.window_start, request.window_end))
        .collect();

    let ids = over_limit(
        &claims,
        request.window_start,
        request.window_end,
        max_quantity - request.quantity,
    );

    if ids.is_empty() {
        Availability::Admissible
    } else {
        Availability::Conflict(ids)
    }
}

/// Highest concurrent active quantity inside `[start, end)`.
pub fn peak_usage(
    reservations: &[reservation::Model],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> i32 {
    let claims = active_overlapping(reservations, start, end);
    segments(&claims, start, end)
        .iter()
        .map(|s| s.load)
        .max()
        .unwrap_or(0)
}

/// Active reservations covering any instant of `[start, end)` where their combined
/// quantity exceeds `limit`, in window order.
pub fn over_capacity(
    reservations: &[reservation::Model],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: i32,
) -> Vec<Uuid> {
    let claims = active_overlapping(reservations, start, end);
    over_limit(&claims, start, end, limit)
}

fn active_overlapping(
    reservations: &[reservation::Model],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<&reservation::Model> {
    reservations
        .iter()
        .filter(|r| r.status.is_active() && r.overlaps(start, end))
        .collect()
}

fn over_limit(
    claims: &[&reservation::Model],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: i32,
) -> Vec<Uuid> {
    let mut ordered: Vec<&reservation::Model> = claims.to_vec();
    ordered.sort_by_key(|r| (r.window_start, r.window_end, r.id));

    let mut flagged = BTreeSet::new();
    for segment in segments(&ordered, start, end) {
        if segment.load > limit {
            flagged.extend(segment.members);
        }
    }
    flagged.into_iter().map(|idx| ordered[idx].id).collect()
}

/// A maximal sub-interval over which the set of covering claims is constant.
#[derive(Debug)]
struct Segment {
    load: i32,
    members: Vec<usize>,
}

/// Sweeps the clipped start/end points of `claims` across `[start, end)`.
///
/// Ends sort before starts at the same instant, so touching windows never share a
/// segment.
fn segments(claims: &[&reservation::Model], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Segment> {
    let mut points: Vec<(DateTime<Utc>, bool, usize)> = Vec::with_capacity(claims.len() * 2);
    for (idx, r) in claims.iter().enumerate() {
        let from = r.window_start.max(start);
        let to = r.window_end.min(end);
        if from < to {
            points.push((from, true, idx));
            points.push((to, false, idx));
        }
    }
    // false < true: releases are applied before acquisitions at equal instants.
    points.sort_by_key(|&(at, is_start, idx)| (at, is_start, idx));

    let mut out = Vec::new();
    let mut active: BTreeSet<usize> = BTreeSet::new();
    let mut load = 0;
    let mut i = 0;
    while i < points.len() {
        let at = points[i].0;
        while i < points.len() && points[i].0 == at {
            let (_, is_start, idx) = points[i];
            if is_start {
                active.insert(idx);
                load += claims[idx].quantity;
            } else {
                active.remove(&idx);
                load -= claims[idx].quantity;
            }
            i += 1;
        }
        if !active.is_empty() && at < end {
            out.push(Segment {
                load,
                members: active.iter().copied().collect(),
            });
        }
    }
    out
}

/// Loads the item's active reservations on `conn` and resolves `request` against them.
pub(crate) async fn evaluate<C: ConnectionTrait>(
    conn: &C,
    item: &item::Model,
    request: &CapacityRequest,
) -> Result<Availability, ServiceError> {
    let existing = reservation_ledger::active_for_item(conn, item.id).await?;
    let outcome = resolve(&existing, item.max_quantity, request);
    if let Availability::Conflict(ids) = &outcome {
        counter!("barangay_reservations.capacity_conflicts", 1);
        debug!(item_id = %item.id, conflicting = ids.len(), "Capacity conflict");
    }
    Ok(outcome)
}

/// Read-only availability queries.
#[derive(Clone)]
pub struct AvailabilityService {
    db_pool: Arc<DatabaseConnection>,
}

impl AvailabilityService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    /// Answers whether `quantity` units of the item could be reserved over the window
    /// right now, without recording anything.
    #[instrument(skip(self))]
    pub async fn check_availability(
        &self,
        item_id: Uuid,
        quantity: i32,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Availability, ServiceError> {
        validate_request(quantity, window_start, window_end)?;
        let db = &*self.db_pool;

        let item = item::Entity::find_by_id(item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", item_id)))?;

        if quantity > item.max_quantity {
            return Err(ServiceError::ValidationError(format!(
                "quantity {} exceeds item capacity {}",
                quantity, item.max_quantity
            )));
        }

        evaluate(
            db,
            &item,
            &CapacityRequest::new(quantity, window_start, window_end),
        )
        .await
    }
}
