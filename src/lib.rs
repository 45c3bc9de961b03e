//! Fulfillment - payment-confirmation ingestion and gated delivery
//!
//! This library turns verified gateway callbacks into exactly one order per
//! payment, dispatches type-specific fulfillment, and answers entitlement
//! checks for the asset-delivery worker.

pub mod catalog;
pub mod config;
pub mod db;
pub mod email;
pub mod entitlement;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod id;
pub mod ledger;
pub mod models;
pub mod payments;
