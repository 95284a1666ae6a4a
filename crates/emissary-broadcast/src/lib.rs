//! # Emissary Broadcast
//!
//! Fan-out of event notifications to their handlers.
//!
//! An event notification may have any number of handlers. The publisher
//! turns each of them into a [`HandlerInvoker`] and hands the list to a
//! [`BroadcastingStrategy`], which decides how they run and how their
//! failures are reported.
//!
//! ## Built-in Strategies
//!
//! | Strategy | Behavior |
//! |----------|----------|
//! | [`SequentialBroadcastingStrategy`] | One handler at a time, in registration order |
//! | [`ParallelBroadcastingStrategy`] | All handlers concurrently, optionally capped |
//!
//! ## Failure Aggregation
//!
//! Strategies that keep going after a failure report what they collected
//! through [`aggregate_failures`]:
//!
//! - no failures: `Ok(())`
//! - one failure: that error, unchanged
//! - only cancellations: the first cancellation
//! - otherwise: [`AggregateError`](emissary_core::AggregateError) with every failure

#![doc(html_root_url = "https://docs.rs/emissary-broadcast/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod aggregate;
mod parallel;
mod sequential;
mod strategy;

pub use aggregate::aggregate_failures;
pub use parallel::ParallelBroadcastingStrategy;
pub use sequential::{FailurePolicy, SequentialBroadcastingStrategy};
pub use strategy::{
    strategy_from_config, BroadcastRequest, BroadcastingStrategy, DefaultBroadcastingStrategy,
    HandlerInvoker,
};
