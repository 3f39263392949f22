use std::sync::Arc;

use ndarray::s;
use serde_json::{json, Value};
use tracing::debug;

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::reference::StReference;

/// Concatenates the bands of two cubes that share the same grid and
/// chunking; band names are prefixed to keep them unique.
///
pub struct JoinBandsCube {
    base: CubeBase,
    cube_a: Arc<dyn Cube>,
    cube_b: Arc<dyn Cube>,
    prefix_a: String,
    prefix_b: String,
    bands: BandCollection,
}

fn prefixed(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}_{name}")
    }
}

impl JoinBandsCube {
    pub fn create(
        cube_a: Arc<dyn Cube>,
        cube_b: Arc<dyn Cube>,
        prefix_a: &str,
        prefix_b: &str,
    ) -> Result<Arc<Self>> {
        if cube_a.st_reference() != cube_b.st_reference() {
            return Err(Error::Config(
                "join_bands inputs must share the same spatiotemporal reference".to_string(),
            ));
        }
        if cube_a.chunk_size() != cube_b.chunk_size() {
            return Err(Error::Config(
                "join_bands inputs must share the same chunk size".to_string(),
            ));
        }

        let mut bands = BandCollection::new();
        for band in cube_a.bands().iter() {
            let mut band = band.clone();
            band.name = prefixed(prefix_a, &band.name);
            bands.add(band)?;
        }
        for band in cube_b.bands().iter() {
            let mut band = band.clone();
            band.name = prefixed(prefix_b, &band.name);
            bands.add(band)?;
        }

        let out = Arc::new(Self {
            base: CubeBase::new(),
            prefix_a: prefix_a.to_string(),
            prefix_b: prefix_b.to_string(),
            bands,
            cube_a,
            cube_b,
        });
        link_child(&out.cube_a, &(Arc::clone(&out) as Arc<dyn Cube>));
        link_child(&out.cube_b, &(Arc::clone(&out) as Arc<dyn Cube>));

        Ok(out)
    }
}

impl Cube for JoinBandsCube {
    fn base(&self) -> &CubeBase {
        &self.base
    }

    fn st_reference(&self) -> &StReference {
        self.cube_a.st_reference()
    }

    fn bands(&self) -> &BandCollection {
        &self.bands
    }

    fn chunk_size(&self) -> [usize; 3] {
        self.cube_a.chunk_size()
    }

    fn read_chunk(&self, id: ChunkId) -> Result<ChunkData> {
        debug!(id, "join_bands_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let shape = self.chunk_shape(id);
        let mut chunk_a = self.cube_a.read_chunk(id)?;
        let mut chunk_b = self.cube_b.read_chunk(id)?;
        if chunk_a.buf().is_none() && chunk_b.buf().is_none() {
            return Ok(ChunkData::empty(shape));
        }

        let nb_a = self.cube_a.size_bands();
        let mut out = ChunkData::empty(shape);
        let buf = out.materialize();
        buf.slice_mut(s![..nb_a, .., .., ..])
            .assign(chunk_a.materialize());
        buf.slice_mut(s![nb_a.., .., .., ..])
            .assign(chunk_b.materialize());

        Ok(out)
    }

    fn to_json(&self) -> Result<Value> {
        Ok(json!({
            "cube_type": "join_bands",
            "prefix_A": self.prefix_a.clone(),
            "prefix_B": self.prefix_b.clone(),
            "A": self.cube_a.to_json()?,
            "B": self.cube_b.to_json()?,
        }))
    }
}
