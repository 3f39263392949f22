use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::ops::reduce::{Reducer, TimeReducer};
use crate::reference::StReference;

/// Reduces a cube over its whole time axis; one output band per
/// `(reducer, band)` pair, output geometry `nt = 1`, `dt = t1 - t0`.
///
pub struct ReduceTimeCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    st: StReference,
    bands: BandCollection,
    reducer_bands: Vec<(Reducer, String)>,
    pairs: Vec<(Reducer, usize)>,
    chunk_size: [usize; 3],
}

impl ReduceTimeCube {
    pub fn create(
        in_cube: Arc<dyn Cube>,
        reducer_bands: Vec<(Reducer, String)>,
    ) -> Result<Arc<Self>> {
        if reducer_bands.is_empty() {
            return Err(Error::Config(
                "reduce_time needs at least one (reducer, band) pair".to_string(),
            ));
        }

        let mut bands = BandCollection::new();
        let mut pairs = vec![];
        for (reducer, name) in &reducer_bands {
            let idx = in_cube.bands().get_index(name)?;
            let mut band = in_cube.bands().get(idx).clone();
            // Rename only if there still is a time axis to reduce
            if in_cube.size_t() > 1 {
                band.name = format!("{}_{}", band.name, reducer.as_str());
            }
            bands.add(band)?;
            pairs.push((*reducer, idx));
        }

        let in_chunks = in_cube.chunk_size();
        let out = Arc::new(Self {
            base: CubeBase::new(),
            st: in_cube.st_reference().collapsed_time(),
            bands,
            reducer_bands,
            pairs,
            chunk_size: [1, in_chunks[1], in_chunks[2]],
            in_cube,
        });
        link_child(&out.in_cube, &(Arc::clone(&out) as Arc<dyn Cube>));

        Ok(out)
    }

    /// Expand the single-reducer form: apply one reducer to every band of
    /// the input.
    pub fn create_single(in_cube: Arc<dyn Cube>, reducer: Reducer) -> Result<Arc<Self>> {
        let pairs = in_cube
            .bands()
            .names()
            .into_iter()
            .map(|name| (reducer, name))
            .collect();

        Self::create(in_cube, pairs)
    }

    pub fn reducer_bands(&self) -> &[(Reducer, String)] {
        &self.reducer_bands
    }
}

impl Cube for ReduceTimeCube {
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
        debug!(id, "reduce_time_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let mut out = ChunkData::empty(self.chunk_shape(id));
        let buf = out.materialize();

        let mut reducers: Vec<TimeReducer> = self
            .pairs
            .iter()
            .enumerate()
            .map(|(i, (reducer, band_in))| TimeReducer::new(*reducer, *band_in, i))
            .collect();
        for reducer in reducers.iter_mut() {
            reducer.init(buf);
        }

        // The output spatial chunking matches the input, so the input chunks
        // contributing to this output chunk share its (iy, ix) and run over
        // every it.
        let per_slice = self.in_cube.count_chunks_y() * self.in_cube.count_chunks_x();
        for it in 0..self.in_cube.count_chunks_t() {
            let in_id = (it * per_slice) as ChunkId + id;
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
            "cube_type": "reduce_time",
            "reducer_bands": pairs,
            "in_cube": self.in_cube.to_json()?,
        }))
    }
}
