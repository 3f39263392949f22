//! Derived cubes: the nodes of the cube algebra.

pub mod apply_pixel;
pub mod dummy;
pub mod filter_pixel;
pub mod join_bands;
pub mod reduce;
pub mod reduce_space;
pub mod reduce_time;
pub mod select_bands;
pub mod stream;
pub mod window_time;
