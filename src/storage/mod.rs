//! Store-of-record seam.
//!
//! - [`traits`]: the [`traits::StoreOfRecord`] interface and the change feed type
//! - [`memory`]: an in-process store of record with an ordered feed

pub mod memory;
pub mod traits;
