//! Splits the address set into bounded batches.
//!
//! Batches are walked strictly one after the other so that the number of
//! probe packets in flight for one request never exceeds what a single batch
//! produces.

use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("batch limit must be at least 1")]
    ZeroLimit,
}

/// Number of batches needed to cover `total` addresses, rounding up.
pub fn batch_count(total: usize, limit: usize) -> Result<usize, ScheduleError> {
    if limit == 0 {
        return Err(ScheduleError::ZeroLimit);
    }
    Ok(total.div_ceil(limit))
}

/// Consecutive, non-overlapping slices of at most `limit` addresses.
pub fn batches(addrs: &[Ipv4Addr], limit: usize) -> Result<Vec<&[Ipv4Addr]>, ScheduleError> {
    let expected = batch_count(addrs.len(), limit)?;
    let batches: Vec<&[Ipv4Addr]> = addrs.chunks(limit).collect();
    debug_assert_eq!(batches.len(), expected);
    Ok(batches)
}
