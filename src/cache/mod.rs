//! The compact grounding cache: complied blocks and cache fragments.

pub mod block;
pub mod fragment;

pub use block::{CbId, CbPool, CbPoolStats, CompliedBlock, OpStats};
pub use fragment::{CacheFragment, Entry, VarInfo};
