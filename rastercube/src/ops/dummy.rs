use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::trace;

use crate::band::{Band, BandCollection};
use crate::chunk::{ChunkData, ChunkId};
use crate::collection_cube::DEFAULT_CHUNK_SIZE;
use crate::cube::{Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::reference::{CubeView, StReference};

/// A cube that synthesizes constant-filled chunks, for tests and benchmarks.
///
pub struct DummyCube {
    base: CubeBase,
    view: CubeView,
    bands: BandCollection,
    fill: f64,
    chunk_size: Mutex<[usize; 3]>,
}

impl DummyCube {
    pub fn create(view: CubeView, nbands: usize, fill: f64) -> Result<Arc<Self>> {
        if nbands == 0 {
            return Err(Error::Config("dummy cube needs at least one band".to_string()));
        }
        let mut bands = BandCollection::new();
        for i in 1..=nbands {
            bands.add(Band::new(format!("band{i}")))?;
        }

        Ok(Arc::new(Self {
            base: CubeBase::new(),
            view,
            bands,
            fill,
            chunk_size: Mutex::new(DEFAULT_CHUNK_SIZE),
        }))
    }

    pub fn set_chunk_size(&self, size: [usize; 3]) {
        *self.chunk_size.lock() = size;
    }

    pub fn view(&self) -> &CubeView {
        &self.view
    }
}

impl Cube for DummyCube {
    fn base(&self) -> &CubeBase {
        &self.base
    }

    fn st_reference(&self) -> &StReference {
        self.view.st_reference()
    }

    fn bands(&self) -> &BandCollection {
        &self.bands
    }

    fn chunk_size(&self) -> [usize; 3] {
        *self.chunk_size.lock()
    }

    fn read_chunk(&self, id: ChunkId) -> Result<ChunkData> {
        trace!(id, "dummy_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        Ok(ChunkData::filled(self.chunk_shape(id), self.fill))
    }

    fn to_json(&self) -> Result<Value> {
        let chunk_size = self.chunk_size();
        Ok(json!({
            "cube_type": "dummy",
            "view": self.view.to_json(),
            "chunk_size": [chunk_size[0], chunk_size[1], chunk_size[2]],
            "nbands": self.bands.count(),
            "fill": self.fill,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::view;

    #[test]
    fn test_constant_chunks() {
        let c = DummyCube::create(view(2, 2, 3), 1, 5.0).unwrap();
        c.set_chunk_size([3, 2, 2]);
        let chunk = c.read_chunk(0).unwrap();
        assert_eq!(chunk.size(), [1, 3, 2, 2]);
        assert!(chunk.buf().unwrap().iter().all(|v| *v == 5.0));
    }

    #[test]
    fn test_out_of_range() {
        let c = DummyCube::create(view(2, 2, 3), 1, 5.0).unwrap();
        assert!(c.read_chunk(1000).unwrap().is_empty());
    }

    #[test]
    fn test_no_bands_is_an_error() {
        assert!(DummyCube::create(view(2, 2, 3), 0, 5.0).is_err());
    }
}
