//! Chunked, lazily evaluated data cubes over georeferenced raster image
//! collections.
//!
//! A cube view maps an arbitrary collection of heterogeneous images
//! (different projections, resolutions, acquisition times) onto a regular
//! four-dimensional `(band, time, y, x)` grid, partitioned into chunks.
//! Derived cubes form a directed acyclic graph evaluated chunk by chunk on
//! demand: reducers over time and space, per-pixel expressions, band
//! selection and joins, moving temporal windows, and streaming through
//! external processes. Pipelines serialize to self-describing JSON and are
//! rebuilt by [`CubeFactory`].

mod band;
mod chunk;
mod collection;
mod collection_cube;
mod config;
mod cube;
mod errors;
mod expr;
mod factory;
mod geom;
mod helpers;
mod ops;
mod reference;
mod time;
mod warp;

pub use band::Band;
pub use band::BandCollection;

pub use chunk::ChunkData;
pub use chunk::ChunkId;

pub use collection::FindRangeStRow;
pub use collection::ImageCollection;

pub use collection_cube::ImageCollectionCube;
pub use collection_cube::ImageMask;
pub use collection_cube::DEFAULT_CHUNK_SIZE;

pub use config::Config;

pub use cube::Cube;
pub use cube::CubeBase;

pub use errors::Error;
pub use errors::Result;

pub use expr::CompiledExpr;

pub use factory::CubeFactory;

pub use geom::BoundsS;
pub use geom::BoundsSt;
pub use geom::BoundsT;
pub use geom::CoordsSt;

pub use ops::apply_pixel::ApplyPixelCube;
pub use ops::dummy::DummyCube;
pub use ops::filter_pixel::FilterPixelCube;
pub use ops::join_bands::JoinBandsCube;
pub use ops::reduce::Reducer;
pub use ops::reduce_space::ReduceSpaceCube;
pub use ops::reduce_time::ReduceTimeCube;
pub use ops::select_bands::SelectBandsCube;
pub use ops::stream::StreamCube;
pub use ops::window_time::WindowTimeCube;

pub use reference::Aggregation;
pub use reference::CubeView;
pub use reference::Resampling;
pub use reference::StReference;

pub use time::DateTime;
pub use time::Duration;
pub use time::TimeUnit;

pub use warp::RasterBackend;
pub use warp::SourceRaster;
pub use warp::WarpArgs;

#[cfg(test)]
mod testing;
