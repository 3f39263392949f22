use std::sync::Arc;

use ndarray::s;
use serde_json::{json, Value};
use tracing::debug;

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::reference::StReference;

/// Projects the band axis of its input to a named subset, in the given
/// order. Metadata-only at construction; chunk reads copy the selected
/// planes.
///
pub struct SelectBandsCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    bands: BandCollection,
    indices: Vec<usize>,
}

impl SelectBandsCube {
    pub fn create(in_cube: Arc<dyn Cube>, band_names: Vec<String>) -> Result<Arc<Self>> {
        if band_names.is_empty() {
            return Err(Error::Config(
                "select_bands needs at least one band".to_string(),
            ));
        }

        let mut bands = BandCollection::new();
        let mut indices = vec![];
        for name in &band_names {
            let idx = in_cube.bands().get_index(name)?;
            bands.add(in_cube.bands().get(idx).clone())?;
            indices.push(idx);
        }

        let out = Arc::new(Self {
            base: CubeBase::new(),
            bands,
            indices,
            in_cube,
        });
        link_child(&out.in_cube, &(Arc::clone(&out) as Arc<dyn Cube>));

        Ok(out)
    }
}

impl Cube for SelectBandsCube {
    fn base(&self) -> &CubeBase {
        &self.base
    }

    fn st_reference(&self) -> &StReference {
        self.in_cube.st_reference()
    }

    fn bands(&self) -> &BandCollection {
        &self.bands
    }

    fn chunk_size(&self) -> [usize; 3] {
        self.in_cube.chunk_size()
    }

    fn read_chunk(&self, id: ChunkId) -> Result<ChunkData> {
        debug!(id, "select_bands_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let shape = self.chunk_shape(id);
        let in_chunk = self.in_cube.read_chunk(id)?;
        let in_buf = match in_chunk.buf() {
            Some(buf) => buf,
            None => return Ok(ChunkData::empty(shape)),
        };

        let mut out = ChunkData::empty(shape);
        let buf = out.materialize();
        for (out_idx, in_idx) in self.indices.iter().enumerate() {
            buf.slice_mut(s![out_idx, .., .., ..])
                .assign(&in_buf.slice(s![*in_idx, .., .., ..]));
        }

        Ok(out)
    }

    fn to_json(&self) -> Result<Value> {
        Ok(json!({
            "cube_type": "select_bands",
            "bands": self.bands.names(),
            "in_cube": self.in_cube.to_json()?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::apply_pixel::ApplyPixelCube;
    use crate::ops::dummy::DummyCube;
    use crate::testing::view;

    /// Three bands with values 1, 2, 3.
    fn cube() -> Arc<dyn Cube> {
        let c = DummyCube::create(view(2, 2, 2), 1, 0.0).unwrap();
        c.set_chunk_size([2, 2, 2]);
        ApplyPixelCube::create(
            c as Arc<dyn Cube>,
            vec!["1".to_string(), "2".to_string(), "3".to_string()],
            Some(vec!["b1".to_string(), "b2".to_string(), "b3".to_string()]),
        )
        .unwrap() as Arc<dyn Cube>
    }

    #[test]
    fn test_projection_is_pixel_identical() {
        let c = cube();
        let full = c.read_chunk(0).unwrap();
        let selected = SelectBandsCube::create(c, vec!["b3".to_string(), "b1".to_string()])
            .unwrap();
        assert_eq!(selected.bands().names(), vec!["b3", "b1"]);

        let chunk = selected.read_chunk(0).unwrap();
        assert_eq!(chunk.size(), [2, 2, 2, 2]);
        let buf = chunk.buf().unwrap();
        let full_buf = full.buf().unwrap();
        assert_eq!(
            buf.slice(s![0, .., .., ..]),
            full_buf.slice(s![2, .., .., ..])
        );
        assert_eq!(
            buf.slice(s![1, .., .., ..]),
            full_buf.slice(s![0, .., .., ..])
        );
    }

    #[test]
    fn test_unknown_band() {
        assert!(SelectBandsCube::create(cube(), vec!["b9".to_string()]).is_err());
    }

    #[test]
    fn test_empty_selection() {
        assert!(SelectBandsCube::create(cube(), vec![]).is_err());
    }
}
