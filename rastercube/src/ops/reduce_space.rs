use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::ops::reduce::{Reducer, SpaceReducer};
use crate::reference::StReference;

/// Reduces a cube over both spatial axes; one output band per
/// `(reducer, band)` pair, output geometry `nx = ny = 1`, time axis kept.
///
pub struct ReduceSpaceCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    st: StReference,
    bands: BandCollection,
    reducer_bands: Vec<(Reducer, String)>,
    pairs: Vec<(Reducer, usize)>,
    chunk_size: [usize; 3],
}

impl ReduceSpaceCube {
    pub fn create(
        in_cube: Arc<dyn Cube>,
        reducer_bands: Vec<(Reducer, String)>,
    ) -> Result<Arc<Self>> {
        if reducer_bands.is_empty() {
            return Err(Error::Config(
                "reduce_space needs at least one (reducer, band) pair".to_string(),
            ));
        }

        let spatial_extent = in_cube.size_x() > 1 || in_cube.size_y() > 1;
        let mut bands = BandCollection::new();
        let mut pairs = vec![];
        for (reducer, name) in &reducer_bands {
            let idx = in_cube.bands().get_index(name)?;
            let mut band = in_cube.bands().get(idx).clone();
            if spatial_extent {
                band.name = format!("{}_{}", band.name, reducer.as_str());
            }
            bands.add(band)?;
            pairs.push((*reducer, idx));
        }

        let in_chunks = in_cube.chunk_size();
        let out = Arc::new(Self {
            base: CubeBase::new(),
            st: in_cube.st_reference().collapsed_space(),
            bands,
            reducer_bands,
            pairs,
            chunk_size: [in_chunks[0], 1, 1],
            in_cube,
        });
        link_child(&out.in_cube, &(Arc::clone(&out) as Arc<dyn Cube>));

        Ok(out)
    }
}

impl Cube for ReduceSpaceCube {
    fn base(&self) -> &CubeBase {
        &self.base
    }

    fn st_reference(&self) -> &StReference {
        &self.st
    }

    fn bands(&self) -> &BandCollection {
        &self.bands
    }

    fn chunk_size(&self) -> [usize; 3] {
        self.chunk_size
    }

    fn read_chunk(&self, id: ChunkId) -> Result<ChunkData> {
        debug!(id, "reduce_space_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        // Already spatially reduced and same band layout: nothing to fold
        if self.in_cube.size_y() == 1
            && self.in_cube.size_x() == 1
            && self.in_cube.bands() == &self.bands
        {
            return self.in_cube.read_chunk(id);
        }

        let mut out = ChunkData::empty(self.chunk_shape(id));
        let buf = out.materialize();

        let mut reducers: Vec<SpaceReducer> = self
            .pairs
            .iter()
            .enumerate()
            .map(|(i, (reducer, band_in))| SpaceReducer::new(*reducer, *band_in, i))
            .collect();
        for reducer in reducers.iter_mut() {
            reducer.init(buf);
        }

        // Output chunk `id` is the it-th time chunk; every input chunk in the
        // same it-range contributes.
        let per_slice = self.in_cube.count_chunks_y() * self.in_cube.count_chunks_x();
        for i in 0..per_slice {
            let in_id = (id as usize * per_slice + i) as ChunkId;
            let chunk = self.in_cube.read_chunk(in_id)?;
            for reducer in reducers.iter_mut() {
                reducer.combine(buf, &chunk, in_id);
            }
        }

        for reducer in reducers.iter_mut() {
            reducer.finalize(buf);
        }

        Ok(out)
    }

    fn to_json(&self) -> Result<Value> {
        let pairs: Vec<Value> = self
            .reducer_bands
            .iter()
            .map(|(reducer, band)| json!([reducer.as_str(), band]))
            .collect();

        Ok(json!({
            "cube_type": "reduce_space",
            "reducer_bands": pairs,
            "in_cube": self.in_cube.to_json()?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::dummy::DummyCube;
    use crate::testing::view;

    fn dummy(nx: usize, ny: usize, nt: usize, fill: f64) -> Arc<DummyCube> {
        let c = DummyCube::create(view(nx, ny, nt), 1, fill).unwrap();
        c.set_chunk_size([nt, 2, 2]);
        c
    }

    #[test]
    fn test_sum_over_pixels() {
        let c = dummy(4, 4, 2, 1.5);
        let r = ReduceSpaceCube::create(
            c as Arc<dyn Cube>,
            vec![(Reducer::Sum, "band1".to_string())],
        )
        .unwrap();
        assert_eq!(r.size_x(), 1);
        assert_eq!(r.size_y(), 1);
        assert_eq!(r.size_t(), 2);
        assert_eq!(r.bands().names(), vec!["band1_sum"]);

        let chunk = r.read_chunk(0).unwrap();
        assert_eq!(chunk.size(), [1, 2, 1, 1]);
        let buf = chunk.buf().unwrap();
        assert_eq!(buf[[0, 0, 0, 0]], 24.0);
        assert_eq!(buf[[0, 1, 0, 0]], 24.0);
    }

    #[test]
    fn test_count_and_mean_agree() {
        let c = dummy(4, 4, 1, 7.0);
        let r = ReduceSpaceCube::create(
            c as Arc<dyn Cube>,
            vec![
                (Reducer::Count, "band1".to_string()),
                (Reducer::Mean, "band1".to_string()),
                (Reducer::Sum, "band1".to_string()),
            ],
        )
        .unwrap();
        let chunk = r.read_chunk(0).unwrap();
        let buf = chunk.buf().unwrap();
        let count = buf[[0, 0, 0, 0]];
        let mean = buf[[1, 0, 0, 0]];
        let sum = buf[[2, 0, 0, 0]];
        assert_eq!(count, 16.0);
        assert_eq!(mean, sum / count);
    }

    #[test]
    fn test_passthrough_when_already_reduced() {
        let c = DummyCube::create(view(1, 1, 3), 1, 9.0).unwrap();
        c.set_chunk_size([3, 1, 1]);
        let r = ReduceSpaceCube::create(
            c as Arc<dyn Cube>,
            vec![(Reducer::Sum, "band1".to_string())],
        )
        .unwrap();
        // Names are unchanged on an already-reduced input
        assert_eq!(r.bands().names(), vec!["band1"]);
        let chunk = r.read_chunk(0).unwrap();
        assert_eq!(chunk.size(), [1, 3, 1, 1]);
        assert!(chunk.buf().unwrap().iter().all(|v| *v == 9.0));
    }
}
