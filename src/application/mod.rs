//! Application layer: orchestration of the settlement core.
//!
//! `OrderLifecycle` applies every order transition under a per-order lock
//! and commits the resulting rows atomically. `PayoutDispatcher` moves money
//! through the gateway, `WebhookReconciler` feeds gateway events back in and
//! `BookingGuarantor` repairs missing booking rows.

pub mod commands;
pub mod guarantor;
pub mod lifecycle;
pub mod locks;
pub mod payout;
pub mod reconciler;
