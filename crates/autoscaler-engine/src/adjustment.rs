//! Adjustment expressions.
//!
//! A trigger's adjustment is either a signed step (`"+1"`, `"-2"`) or a
//! signed percentage (`"10%"`, `"-60%"`) of the current instance count.
//! Bounds are not applied here.

use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

/// An adjustment expression that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdjustmentError {
    #[error("invalid percentage adjustment {adjustment:?}: {source}")]
    Percentage {
        adjustment: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("invalid step adjustment {adjustment:?}: {source}")]
    Step {
        adjustment: String,
        #[source]
        source: ParseIntError,
    },
}

/// Apply `adjustment` to `current` instances.
///
/// Percentages round half up. A non-zero percentage always moves the count
/// by at least one instance in its direction.
pub fn compute_new_instances(current: i32, adjustment: &str) -> Result<i32, AdjustmentError> {
    if let Some(number) = adjustment.strip_suffix('%') {
        let pct: f64 = number
            .parse()
            .map_err(|source| AdjustmentError::Percentage {
                adjustment: adjustment.to_string(),
                source,
            })?;

        let mut new_instances = (f64::from(current) * (1.0 + pct / 100.0) + 0.5) as i32;
        if new_instances == current {
            if pct > 0.0 {
                new_instances = current.saturating_add(1);
            } else if pct < 0.0 {
                new_instances = current.saturating_sub(1);
            }
        }
        Ok(new_instances)
    } else {
        let step: i32 = adjustment.parse().map_err(|source| AdjustmentError::Step {
            adjustment: adjustment.to_string(),
            source,
        })?;
        Ok(current.saturating_add(step))
    }
}
