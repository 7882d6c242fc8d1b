//! Status transition rules.
//!
//! Each function inspects a freshly read order and plans the write without
//! touching storage. The service applies the plan with a compare-and-set on
//! the status it was planned against.

use chrono::{DateTime, Utc};
use common::UserId;

use crate::error::DomainError;

use super::models::{
    CancellationRequest, DeliveryAssignment, Order, OrderLine, OrderUpdate, StatusChange,
    StatusUpdateRequest,
};
use super::state::{OrderStatus, PaymentStatus};

pub const MAX_CANCELLATION_REASON_LEN: usize = 500;

/// Accepted delivery estimates, in minutes.
pub const DELIVERY_ESTIMATE_RANGE: std::ops::RangeInclusive<u32> = 1..=180;

/// Estimated delivery time in minutes for a new order.
///
/// 30 minutes base, 2 per line up to 20 more, 5 per line that carries a
/// prescription, capped at one hour.
pub fn estimated_delivery_minutes(lines: &[OrderLine]) -> u32 {
    let line_count = u32::try_from(lines.len()).unwrap_or(u32::MAX);
    let with_prescription = u32::try_from(
        lines
            .iter()
            .filter(|line| line.prescription_id.is_some())
            .count(),
    )
    .unwrap_or(u32::MAX);

    let total = 30u32
        .saturating_add(line_count.saturating_mul(2).min(20))
        .saturating_add(with_prescription.saturating_mul(5));
    total.min(60)
}

/// Plans a move along the status graph.
pub fn plan_transition(
    order: &Order,
    request: &StatusUpdateRequest,
    changed_by: UserId,
    now: DateTime<Utc>,
) -> Result<OrderUpdate, DomainError> {
    let to = request.status;
    if !order.status.can_transition_to(to) {
        return Err(DomainError::InvalidStateTransition {
            from: order.status,
            to,
        });
    }

    let mut update = OrderUpdate::unchanged(order, now);
    update.status = to;
    update.estimated_delivery_minutes = request.estimated_delivery_minutes;
    match to {
        OrderStatus::Confirmed if order.payment_status == PaymentStatus::Pending => {
            update.payment_status = PaymentStatus::Processing;
        }
        OrderStatus::Delivered => {
            update.payment_status = PaymentStatus::Completed;
            update.actual_delivery_date = Some(now.date_naive());
        }
        OrderStatus::Cancelled => {
            update.restock = order.status.is_before_dispatch();
        }
        _ => {}
    }
    update.history_entry = Some(StatusChange {
        status: to,
        at: now,
        note: request.note.clone(),
        changed_by: Some(changed_by),
    });
    Ok(update)
}

/// Plans a cancellation with a reason.
///
/// Stock goes back when the order never left the pharmacy.
pub fn plan_cancellation(
    order: &Order,
    request: &CancellationRequest,
    changed_by: UserId,
    now: DateTime<Utc>,
) -> Result<OrderUpdate, DomainError> {
    let reason = request.reason.trim();
    if reason.is_empty() || reason.chars().count() > MAX_CANCELLATION_REASON_LEN {
        return Err(DomainError::InvalidInput(format!(
            "cancellation reason must be between 1 and {MAX_CANCELLATION_REASON_LEN} characters"
        )));
    }
    if !order.status.is_cancellable() {
        return Err(DomainError::InvalidStateTransition {
            from: order.status,
            to: OrderStatus::Cancelled,
        });
    }

    let mut update = OrderUpdate::unchanged(order, now);
    update.status = OrderStatus::Cancelled;
    if request.refund_requested && order.payment_status == PaymentStatus::Completed {
        update.payment_status = PaymentStatus::Refunded;
    }
    update.restock = order.status.is_before_dispatch();
    update.cancellation_reason = Some(reason.to_string());
    update.history_entry = Some(StatusChange {
        status: OrderStatus::Cancelled,
        at: now,
        note: Some(reason.to_string()),
        changed_by: Some(changed_by),
    });
    Ok(update)
}

/// Plans handing an order to a delivery partner.
///
/// A packed order is shipped through the regular transition; earlier
/// statuses only record the assignment.
pub fn plan_delivery_assignment(
    order: &Order,
    assignment: &DeliveryAssignment,
    changed_by: UserId,
    now: DateTime<Utc>,
) -> Result<OrderUpdate, DomainError> {
    if !DELIVERY_ESTIMATE_RANGE.contains(&assignment.estimated_delivery_minutes) {
        return Err(DomainError::InvalidInput(format!(
            "estimated delivery time must be between {} and {} minutes",
            DELIVERY_ESTIMATE_RANGE.start(),
            DELIVERY_ESTIMATE_RANGE.end()
        )));
    }
    if order.status.is_terminal() || order.status == OrderStatus::Delivered {
        return Err(DomainError::Conflict(format!(
            "cannot assign delivery to an order that is {}",
            order.status
        )));
    }

    let mut update = if order.status == OrderStatus::Packed {
        let request = StatusUpdateRequest {
            status: OrderStatus::Shipped,
            estimated_delivery_minutes: None,
            note: Some("Picked up by delivery partner".to_string()),
        };
        plan_transition(order, &request, changed_by, now)?
    } else {
        OrderUpdate::unchanged(order, now)
    };
    update.delivery_partner_id = Some(assignment.delivery_partner_id);
    update.estimated_delivery_minutes = Some(assignment.estimated_delivery_minutes);
    update.tracking_number = assignment.tracking_number.clone();
    Ok(update)
}
