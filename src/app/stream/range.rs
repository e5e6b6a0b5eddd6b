//! Range header parsing and window selection

use serde::{Deserialize, Serialize};

use crate::constants::stream;
use crate::errors::{ConfigError, StreamError, StreamResult};

/// A single byte range as written by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`, both ends inclusive
    Bounded { from: u64, to: u64 },
    /// `bytes=a-`
    OpenEnded { from: u64 },
    /// `bytes=-n`, the last `n` bytes
    Suffix { length: u64 },
}

/// Parse a `Range` header value
///
/// Only single `bytes` ranges are understood. Anything else, including
/// multi-range requests, yields `None` and is served as if no header had
/// been sent.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let ranges = value.trim().strip_prefix("bytes=")?.trim();
    if ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        (true, false) => {
            let length = end.parse::<u64>().ok()?;
            (length > 0).then_some(ByteRange::Suffix { length })
        }
        (false, true) => Some(ByteRange::OpenEnded {
            from: start.parse().ok()?,
        }),
        (false, false) => {
            let from = start.parse::<u64>().ok()?;
            let to = end.parse::<u64>().ok()?;
            (from <= to).then_some(ByteRange::Bounded { from, to })
        }
    }
}

/// Window sizes for requests that do not bound themselves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Last byte offset served to a request without a `Range` header
    pub probe_window: u64,
    /// Open-ended ranges are served this many alignment units at a time
    pub open_ended_units: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            probe_window: stream::PROBE_WINDOW,
            open_ended_units: stream::OPEN_ENDED_UNITS,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_window == 0 {
            return Err(ConfigError::invalid(
                "stream.probe_window",
                self.probe_window,
                "must be greater than 0",
            ));
        }
        if self.open_ended_units == 0 {
            return Err(ConfigError::invalid(
                "stream.open_ended_units",
                self.open_ended_units,
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Decide which bytes of a `total`-byte object to answer with
    pub fn window(
        &self,
        range: Option<ByteRange>,
        total: u64,
        alignment: u64,
    ) -> StreamResult<ServeWindow> {
        let open_ended = |from: u64| ServeWindow {
            from,
            to: from
                .saturating_add(self.open_ended_units.saturating_mul(alignment))
                .min(total - 1),
            probe: false,
        };

        let range = match range {
            None if total == 0 => return Ok(ServeWindow::empty()),
            None => {
                return Ok(ServeWindow {
                    from: 0,
                    to: self.probe_window.min(total - 1),
                    probe: true,
                })
            }
            Some(range) => range,
        };

        let from = match range {
            ByteRange::Bounded { from, .. } | ByteRange::OpenEnded { from } => from,
            ByteRange::Suffix { length } => total.saturating_sub(length),
        };
        if from >= total {
            return Err(StreamError::RangeNotSatisfiable { from, total });
        }

        Ok(match range {
            ByteRange::Bounded { to, .. } if to < total => ServeWindow {
                from,
                to,
                probe: false,
            },
            ByteRange::Bounded { .. } | ByteRange::OpenEnded { .. } => open_ended(from),
            ByteRange::Suffix { .. } => ServeWindow {
                from,
                to: total - 1,
                probe: false,
            },
        })
    }
}

/// Inclusive byte window chosen for one reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeWindow {
    pub from: u64,
    pub to: u64,
    /// Chosen for a request without a `Range` header
    pub probe: bool,
}

impl ServeWindow {
    /// Probe reply for a zero-length object
    fn empty() -> Self {
        Self {
            from: 0,
            to: 0,
            probe: true,
        }
    }

    /// Number of bytes in the window, given the object size
    pub fn len(&self, total: u64) -> u64 {
        if total == 0 {
            0
        } else {
            self.to - self.from + 1
        }
    }

    /// A probe that happens to cover the whole object gets a plain 200
    pub fn is_whole_object(&self, total: u64) -> bool {
        self.probe && self.from == 0 && (total == 0 || self.to + 1 >= total)
    }
}
