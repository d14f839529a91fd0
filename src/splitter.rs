//! Load splitting across remote workers

use crate::error::{ControlError, Result};

/// Split `total` into `n` shares that differ by at most one unit.
///
/// The first `total % n` workers receive the extra unit, so the result is
/// order-stable and always sums back to `total`.
pub fn split(total: u64, n: usize) -> Result<Vec<u64>> {
    if n == 0 {
        return Err(ControlError::InvalidDistribution(
            "cannot split load across zero workers".to_string(),
        ));
    }

    let workers = n as u64;
    let base = total / workers;
    let remainder = total % workers;

    Ok((0..workers)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect())
}
