//! Cost evaluation.
//!
//! The scalar price of a [`Cost`] profile is the sum of its resource
//! quantities times its priority multiplier. A profile without a `priority`
//! entry prices at zero whatever its resources are.

use crate::core::resource::{Cost, PRIORITY_RESOURCE};

/// Scalar cost of a profile.
#[must_use]
pub fn evaluate(cost: &Cost) -> f64 {
    let mut priority = 0.0;
    let mut total = 0.0;
    for (label, value) in &cost.spec.resources {
        if label == PRIORITY_RESOURCE {
            priority = *value;
        } else {
            total += value;
        }
    }
    total * priority
}
