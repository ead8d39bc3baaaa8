//! Chunk buffering and flush coordination.
//!
//! The chunk buffer holds the active builder and decides when a flush is
//! due. The flush slot keeps at most one sealed chunk in flight.

mod chunk_buffer;
mod flush_slot;

pub use chunk_buffer::{ChunkBuffer, PARTIAL_SUFFIX};
pub use flush_slot::FlushSlot;
