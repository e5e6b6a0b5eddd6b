//! Progressive byte-range streaming
//!
//! [`StreamServer`] turns a client `Range` request into a reply built from
//! the local cache, an aligned remote fetch, or both. Requests without a
//! `Range` header get a bounded probe window so players can learn the size
//! without pulling the whole object.

pub mod range;
pub mod server;

#[cfg(test)]
mod tests;

pub use range::{parse_range_header, ByteRange, ServeWindow, StreamConfig};
pub use server::{content_disposition, ReplyBody, ServedFrom, StreamReply, StreamServer};
