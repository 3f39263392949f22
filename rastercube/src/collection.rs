//! The catalog interface the engine reads imagery through.
//!
//! An image collection is an opaque, pre-existing store that knows which
//! source rasters exist, what bands they carry, and where they sit in space
//! and time. The engine makes no assumption about how it is materialized; a
//! SQLite catalog, a STAC index, and an in-memory table are all fine.

use crate::band::Band;
use crate::errors::Result;
use crate::geom::BoundsSt;

/// One (dataset, band) assignment whose footprint intersects a query window.
///
/// `descriptor` is an opaque identifier for a single source raster,
/// typically its path or URL. Rows sharing a descriptor describe bands of
/// the same raster and arrive contiguously so the raster is opened once.
///
#[derive(Clone, Debug)]
pub struct FindRangeStRow {
    pub descriptor: String,

    /// Acquisition instant, ISO-8601; all bands of one dataset share it.
    pub datetime: String,

    /// Band name as the collection knows it.
    pub band_name: String,

    /// One-based band number inside the source raster.
    pub band_num: u16,
}

/// A queryable catalog of heterogeneous source rasters.
///
/// `find_range_st` must return rows ordered by descriptor (so equal
/// descriptors are contiguous) and deterministically per window; FIRST/LAST
/// temporal aggregation depends on that order.
///
pub trait ImageCollection: Send + Sync {
    /// All bands the collection offers, ordered and stable.
    fn get_bands(&self) -> Result<Vec<Band>>;

    /// Every (dataset, band) whose footprint intersects `extent` in both
    /// space and time.
    fn find_range_st(&self, extent: &BoundsSt) -> Result<Vec<FindRangeStRow>>;

    /// Whether this collection only exists for the lifetime of the process;
    /// temporary collections cannot take part in serialized cube graphs.
    fn is_temporary(&self) -> bool;

    /// Where a non-temporary collection lives, for serialization.
    fn filename(&self) -> String;
}
