use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::Result;
use crate::expr::CompiledExpr;
use crate::ops::apply_pixel::{expr_vars, fill_special_vars, SPECIAL_VARS};
use crate::reference::StReference;

/// Keeps pixels where a boolean predicate over the band values holds and
/// writes NaN everywhere else. Bands and geometry are unchanged.
///
pub struct FilterPixelCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    bands: BandCollection,
    predicate_src: String,
    predicate: CompiledExpr,
}

impl FilterPixelCube {
    pub fn create(in_cube: Arc<dyn Cube>, predicate: &str) -> Result<Arc<Self>> {
        let vars = expr_vars(in_cube.bands());
        let compiled = CompiledExpr::compile(predicate, &vars)?;

        let mut bands = BandCollection::new();
        for band in in_cube.bands().iter() {
            bands.add(band.clone())?;
        }

        let out = Arc::new(Self {
            base: CubeBase::new(),
            bands,
            predicate_src: predicate.to_string(),
            predicate: compiled,
            in_cube,
        });
        link_child(&out.in_cube, &(Arc::clone(&out) as Arc<dyn Cube>));

        Ok(out)
    }
}

impl Cube for FilterPixelCube {
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
        debug!(id, "filter_pixel_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let shape = self.chunk_shape(id);
        let mut chunk = self.in_cube.read_chunk(id)?;
        if chunk.buf().is_none() {
            return Ok(ChunkData::empty(shape));
        }

        let st_ref = self.in_cube.st_reference().clone();
        let [it, iy, ix] = self.chunk_coords_from_id(id);
        let [ct, cy, cx] = self.chunk_size();
        let nb = self.bands.count();

        let buf = chunk.materialize();
        let mut env = vec![0.0; nb + SPECIAL_VARS.len()];

        for t in 0..shape[1] {
            for y in 0..shape[2] {
                for x in 0..shape[3] {
                    for b in 0..nb {
                        env[b] = buf[[b, t, y, x]];
                    }
                    fill_special_vars(
                        &mut env,
                        nb,
                        &st_ref,
                        it * ct + t,
                        iy * cy + y,
                        ix * cx + x,
                    );
                    let keep = self.predicate.eval(&env);
                    if keep.is_nan() || keep == 0.0 {
                        for b in 0..nb {
                            buf[[b, t, y, x]] = f64::NAN;
                        }
                    }
                }
            }
        }

        Ok(chunk)
    }

    fn to_json(&self) -> Result<Value> {
        Ok(json!({
            "cube_type": "filter_pixel",
            "predicate": self.predicate_src.clone(),
            "in_cube": self.in_cube.to_json()?,
        }))
    }
}
