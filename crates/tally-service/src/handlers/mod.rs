//! HTTP request handlers.

pub mod checkout;
pub mod coupons;
pub mod credits;
pub mod fraud;
pub mod health;
pub mod trials;
pub mod webhooks;
