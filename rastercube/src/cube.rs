//! The cube abstraction every pipeline node implements, along with the
//! shared chunk-id arithmetic.
//!
//! A cube is a logical 4-D array `(band, time, y, x)` over a regular grid,
//! materialized chunk by chunk on demand. Derived cubes hold strong
//! references to their parents and pull parent chunks from `read_chunk`;
//! parents track their children only weakly, for graph walks. Chunk reads
//! must be safe to issue concurrently for distinct ids, so all cube state is
//! fixed at construction.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::errors::Result;
use crate::geom::{BoundsS, BoundsSt, BoundsT, CoordsSt};
use crate::helpers::div_ceil;
use crate::reference::StReference;

/// Child bookkeeping embedded in every cube.
///
pub struct CubeBase {
    children: Mutex<Vec<Weak<dyn Cube>>>,
}

impl CubeBase {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(vec![]),
        }
    }

    pub fn add_child(&self, child: Weak<dyn Cube>) {
        self.children.lock().push(child);
    }

    /// The children that are still alive.
    pub fn children(&self) -> Vec<Arc<dyn Cube>> {
        self.children
            .lock()
            .iter()
            .filter_map(|w| w.upgrade())
            .collect()
    }
}

impl Default for CubeBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire a freshly created cube as a child of its parent.
pub(crate) fn link_child(parent: &Arc<dyn Cube>, child: &Arc<dyn Cube>) {
    parent.base().add_child(Arc::downgrade(child));
}

pub trait Cube: Send + Sync {
    fn base(&self) -> &CubeBase;

    fn st_reference(&self) -> &StReference;

    fn bands(&self) -> &BandCollection;

    /// Nominal chunk size `(ct, cy, cx)`; chunks at the upper grid
    /// boundaries may be smaller, see [`Cube::chunk_size_at`].
    fn chunk_size(&self) -> [usize; 3];

    /// Materialize one chunk. Out-of-range ids yield an empty chunk, never
    /// an error; I/O failures bubble up.
    fn read_chunk(&self, id: ChunkId) -> Result<ChunkData>;

    /// A self-describing JSON description from which the factory can
    /// reconstruct this cube and its whole parent graph.
    fn to_json(&self) -> Result<serde_json::Value>;

    fn size_bands(&self) -> usize {
        self.bands().count()
    }

    fn size_t(&self) -> usize {
        self.st_reference().nt()
    }

    fn size_y(&self) -> usize {
        self.st_reference().ny()
    }

    fn size_x(&self) -> usize {
        self.st_reference().nx()
    }

    fn count_chunks_t(&self) -> usize {
        div_ceil(self.size_t(), self.chunk_size()[0])
    }

    fn count_chunks_y(&self) -> usize {
        div_ceil(self.size_y(), self.chunk_size()[1])
    }

    fn count_chunks_x(&self) -> usize {
        div_ceil(self.size_x(), self.chunk_size()[2])
    }

    fn count_chunks(&self) -> usize {
        self.count_chunks_t() * self.count_chunks_y() * self.count_chunks_x()
    }

    /// Split a chunk id into grid coordinates `(it, iy, ix)`.
    fn chunk_coords_from_id(&self, id: ChunkId) -> [usize; 3] {
        let id = id as usize;
        let ncx = self.count_chunks_x();
        let ncy = self.count_chunks_y();
        [id / (ncy * ncx), (id / ncx) % ncy, id % ncx]
    }

    fn chunk_id_from_coords(&self, coords: [usize; 3]) -> ChunkId {
        let ncx = self.count_chunks_x();
        let ncy = self.count_chunks_y();
        (coords[0] * ncy * ncx + coords[1] * ncx + coords[2]) as ChunkId
    }

    /// The actual `(st, sy, sx)` size of a chunk, clipped at the grid
    /// boundaries.
    fn chunk_size_at(&self, id: ChunkId) -> [usize; 3] {
        let [it, iy, ix] = self.chunk_coords_from_id(id);
        let [ct, cy, cx] = self.chunk_size();
        [
            ct.min(self.size_t() - it * ct),
            cy.min(self.size_y() - iy * cy),
            cx.min(self.size_x() - ix * cx),
        ]
    }

    /// The full `(nb, st, sy, sx)` buffer shape of a chunk.
    fn chunk_shape(&self, id: ChunkId) -> [usize; 4] {
        let [st, sy, sx] = self.chunk_size_at(id);
        [self.size_bands(), st, sy, sx]
    }

    /// World-coordinate bounds of a chunk; the temporal window is clipped to
    /// the cube's `[t0, t1]`.
    fn bounds_from_chunk(&self, id: ChunkId) -> BoundsSt {
        let st = self.st_reference();
        let [it, iy, ix] = self.chunk_coords_from_id(id);
        let [st_size, sy, sx] = self.chunk_size_at(id);
        let [ct, cy, cx] = self.chunk_size();

        let win = st.win();
        let left = win.left + (ix * cx) as f64 * st.dx();
        let right = left + sx as f64 * st.dx();
        let top = win.top - (iy * cy) as f64 * st.dy();
        let bottom = top - sy as f64 * st.dy();

        let t0 = st.t0() + st.dt().scaled((it * ct) as i64);
        let mut t1 = t0 + st.dt().scaled(st_size as i64);
        if t1 > st.t1() {
            t1 = st.t1();
        }

        BoundsSt {
            s: BoundsS::new(left, right, bottom, top),
            t: BoundsT { t0, t1 },
        }
    }

    /// The chunk containing a point, or `None` when the point lies outside
    /// the cube.
    fn find_chunk_that_contains(&self, p: CoordsSt) -> Option<ChunkId> {
        let st = self.st_reference();
        let win = st.win();

        if p.x < win.left || p.x >= win.right || p.y <= win.bottom || p.y > win.top {
            return None;
        }
        let pt = p.t.truncated(st.dt().unit);
        if pt < st.t0() {
            return None;
        }
        let slice = (pt - st.t0()).num_steps(&st.dt());
        if slice < 0 || slice as usize >= st.nt() {
            return None;
        }

        let [ct, cy, cx] = self.chunk_size();
        let ix = ((p.x - win.left) / st.dx()) as usize / cx;
        let iy = ((win.top - p.y) / st.dy()) as usize / cy;
        let it = slice as usize / ct;

        Some(self.chunk_id_from_coords([it, iy, ix]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::dummy::DummyCube;
    use crate::testing::view;
    use crate::time::DateTime;

    fn cube() -> Arc<DummyCube> {
        // 10x10 pixels over 31 days, chunked (4, 4, 4)
        let c = DummyCube::create(view(10, 10, 31), 1, 0.0).unwrap();
        c.set_chunk_size([4, 4, 4]);
        c
    }

    #[test]
    fn test_chunk_counts() {
        let c = cube();
        assert_eq!(c.count_chunks_t(), 8);
        assert_eq!(c.count_chunks_y(), 3);
        assert_eq!(c.count_chunks_x(), 3);
        assert_eq!(c.count_chunks(), 72);
    }

    #[test]
    fn test_id_coord_roundtrip() {
        let c = cube();
        for id in 0..c.count_chunks() as ChunkId {
            let coords = c.chunk_coords_from_id(id);
            assert_eq!(c.chunk_id_from_coords(coords), id);
        }
    }

    #[test]
    fn test_boundary_chunks_sum_to_grid() {
        let c = cube();
        let mut total = 0;
        for id in 0..c.count_chunks() as ChunkId {
            let [st, sy, sx] = c.chunk_size_at(id);
            assert!(st >= 1 && sy >= 1 && sx >= 1);
            total += st * sy * sx;
        }
        assert_eq!(total, c.size_t() * c.size_y() * c.size_x());
    }

    #[test]
    fn test_bounds_from_chunk() {
        let c = cube();
        let bounds = c.bounds_from_chunk(0);
        assert_eq!(bounds.s.left, 0.0);
        assert_eq!(bounds.s.right, 4.0);
        assert_eq!(bounds.s.top, 10.0);
        assert_eq!(bounds.s.bottom, 6.0);
        assert_eq!(bounds.t.t0, c.st_reference().t0());

        // Last chunk along every axis is clipped
        let last = c.chunk_id_from_coords([7, 2, 2]);
        assert_eq!(c.chunk_size_at(last), [3, 2, 2]);
        let bounds = c.bounds_from_chunk(last);
        assert_eq!(bounds.s.right, 10.0);
        assert_eq!(bounds.s.bottom, 0.0);
        assert!(bounds.t.t1 <= c.st_reference().t1());
    }

    #[test]
    fn test_find_chunk_that_contains() {
        let c = cube();
        let t0 = c.st_reference().t0();

        let id = c
            .find_chunk_that_contains(CoordsSt {
                x: 0.5,
                y: 9.5,
                t: t0,
            })
            .unwrap();
        assert_eq!(id, 0);

        // Outside the spatial window
        assert!(c
            .find_chunk_that_contains(CoordsSt {
                x: -1.0,
                y: 9.5,
                t: t0
            })
            .is_none());

        // Before the time axis starts
        assert!(c
            .find_chunk_that_contains(CoordsSt {
                x: 0.5,
                y: 9.5,
                t: DateTime::from_string("1999-01-01").unwrap(),
            })
            .is_none());
    }

    #[test]
    fn test_find_chunk_with_coarser_time_resolution() {
        // A month-resolution point against a daily axis starting
        // 2020-01-01 lands in the first slice
        let c = cube();
        let id = c
            .find_chunk_that_contains(CoordsSt {
                x: 0.5,
                y: 9.5,
                t: DateTime::from_string("2020-01").unwrap(),
            })
            .unwrap();
        assert_eq!(id, 0);

        // A coarser point outside the axis is still rejected
        assert!(c
            .find_chunk_that_contains(CoordsSt {
                x: 0.5,
                y: 9.5,
                t: DateTime::from_string("2020-02").unwrap(),
            })
            .is_none());
    }

    #[test]
    fn test_children_are_weak() {
        let c = cube();
        {
            let child = DummyCube::create(view(10, 10, 31), 1, 1.0).unwrap();
            c.base().add_child(Arc::downgrade(
                &(Arc::clone(&child) as Arc<dyn Cube>),
            ));
            assert_eq!(c.base().children().len(), 1);
        }
        assert_eq!(c.base().children().len(), 0);
    }
}
