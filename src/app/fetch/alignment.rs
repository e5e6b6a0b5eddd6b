//! Chunk alignment arithmetic
//!
//! The provider serves ranges efficiently only on multiples of its alignment
//! unit. A client range `[from, to]` is widened to
//! `[floor(from/A)*A, ceil((to+1)/A)*A)`, capped at the object size, and the
//! fetched bytes are trimmed back to what the client asked for.

use bytes::Bytes;

use crate::errors::{FetchError, FetchResult};

/// An aligned remote span covering an inclusive client range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedSpan {
    /// First byte to fetch, a multiple of the alignment unit
    pub aligned_from: u64,
    /// One past the last byte to fetch
    pub aligned_to: u64,
    /// Bytes to drop from the front of the fetched data
    pub skip: u64,
    /// Bytes to keep after skipping
    pub take: u64,
}

impl AlignedSpan {
    /// Number of bytes to request from the provider
    pub fn fetch_len(&self) -> u64 {
        self.aligned_to - self.aligned_from
    }

    /// Trim fetched aligned data down to the client range
    pub fn trim(&self, data: Bytes) -> FetchResult<Bytes> {
        let end = self.skip + self.take;
        if (data.len() as u64) < end {
            return Err(FetchError::Alignment {
                reason: format!(
                    "fetched {} bytes at {}, need {} to skip {} and keep {}",
                    data.len(),
                    self.aligned_from,
                    end,
                    self.skip,
                    self.take
                ),
            });
        }
        Ok(data.slice(self.skip as usize..end as usize))
    }
}

/// Align the inclusive range `[from, to]` of an object of `total` bytes
pub fn align_range(from: u64, to: u64, unit: u64, total: u64) -> FetchResult<AlignedSpan> {
    if unit == 0 {
        return Err(alignment_error("alignment unit is zero"));
    }
    if from > to {
        return Err(alignment_error(format!("range start {} after end {}", from, to)));
    }
    if to >= total {
        return Err(alignment_error(format!(
            "range end {} outside object of {} bytes",
            to, total
        )));
    }

    let aligned_from = (from / unit) * unit;
    let aligned_to = ((to + unit) / unit).saturating_mul(unit).min(total);

    let span = AlignedSpan {
        aligned_from,
        aligned_to,
        skip: from - aligned_from,
        take: to - from + 1,
    };

    if span.skip + span.take > span.fetch_len() {
        return Err(alignment_error(format!(
            "span [{}, {}) cannot hold skip {} + take {}",
            aligned_from, aligned_to, span.skip, span.take
        )));
    }
    Ok(span)
}

/// Split an aligned span into provider requests of at most `max_len` bytes
///
/// Returns `(offset, length)` pairs. Every offset except possibly the first
/// stays on a multiple of `max_len` relative to the span start.
pub fn split_span(span: &AlignedSpan, max_len: u64) -> Vec<(u64, u64)> {
    let max_len = max_len.max(1);
    let mut parts = Vec::new();
    let mut offset = span.aligned_from;
    while offset < span.aligned_to {
        let len = max_len.min(span.aligned_to - offset);
        parts.push((offset, len));
        offset += len;
    }
    parts
}

fn alignment_error(reason: impl Into<String>) -> FetchError {
    FetchError::Alignment {
        reason: reason.into(),
    }
}
