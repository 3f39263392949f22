use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::band::{Band, BandCollection};
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::expr::CompiledExpr;
use crate::reference::StReference;

/// Variables available to pixel expressions besides the input band names:
/// global array indices and world coordinates of the pixel.
pub(crate) const SPECIAL_VARS: [&str; 9] =
    ["ix", "iy", "it", "x", "y", "left", "right", "top", "bottom"];

pub(crate) fn expr_vars(bands: &BandCollection) -> Vec<String> {
    let mut vars = bands.names();
    vars.extend(SPECIAL_VARS.iter().map(|s| s.to_string()));
    vars
}

/// Fill the special-variable slots of the environment for one pixel.
///
/// `gt`, `gy`, `gx` are global (cube-level) indices.
pub(crate) fn fill_special_vars(
    env: &mut [f64],
    nb: usize,
    st: &StReference,
    gt: usize,
    gy: usize,
    gx: usize,
) {
    let win = st.win();
    let left = win.left + gx as f64 * st.dx();
    let top = win.top - gy as f64 * st.dy();
    env[nb] = gx as f64;
    env[nb + 1] = gy as f64;
    env[nb + 2] = gt as f64;
    env[nb + 3] = left + st.dx() / 2.0;
    env[nb + 4] = top - st.dy() / 2.0;
    env[nb + 5] = left;
    env[nb + 6] = left + st.dx();
    env[nb + 7] = top;
    env[nb + 8] = top - st.dy();
}

/// Evaluates one arithmetic expression per output band at every pixel of the
/// input cube. Expressions are compiled once at construction.
///
pub struct ApplyPixelCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    bands: BandCollection,
    exprs: Vec<(String, CompiledExpr)>,
    band_names_given: bool,
}

impl ApplyPixelCube {
    pub fn create(
        in_cube: Arc<dyn Cube>,
        exprs: Vec<String>,
        band_names: Option<Vec<String>>,
    ) -> Result<Arc<Self>> {
        if exprs.is_empty() {
            return Err(Error::Config(
                "apply_pixel needs at least one expression".to_string(),
            ));
        }
        if let Some(names) = &band_names {
            if names.len() != exprs.len() {
                return Err(Error::Config(format!(
                    "got {} expressions but {} band names",
                    exprs.len(),
                    names.len()
                )));
            }
        }

        let vars = expr_vars(in_cube.bands());
        let mut compiled = vec![];
        for expr in &exprs {
            compiled.push((expr.clone(), CompiledExpr::compile(expr, &vars)?));
        }

        let band_names_given = band_names.is_some();
        let mut bands = BandCollection::new();
        match band_names {
            Some(names) => {
                for name in names {
                    bands.add(Band::new(name))?;
                }
            }
            None => {
                for i in 1..=exprs.len() {
                    bands.add(Band::new(format!("band{i}")))?;
                }
            }
        }

        let out = Arc::new(Self {
            base: CubeBase::new(),
            bands,
            exprs: compiled,
            band_names_given,
            in_cube,
        });
        link_child(&out.in_cube, &(Arc::clone(&out) as Arc<dyn Cube>));

        Ok(out)
    }
}

impl Cube for ApplyPixelCube {
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
        debug!(id, "apply_pixel_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let shape = self.chunk_shape(id);
        let in_chunk = self.in_cube.read_chunk(id)?;
        let in_buf = match in_chunk.buf() {
            Some(buf) => buf,
            None => return Ok(ChunkData::empty(shape)),
        };

        let st_ref = self.st_reference();
        let [it, iy, ix] = self.chunk_coords_from_id(id);
        let [ct, cy, cx] = self.chunk_size();
        let nb = self.in_cube.size_bands();

        let mut out = ChunkData::empty(shape);
        let buf = out.materialize();
        let mut env = vec![0.0; nb + SPECIAL_VARS.len()];

        for t in 0..shape[1] {
            for y in 0..shape[2] {
                for x in 0..shape[3] {
                    for b in 0..nb {
                        env[b] = in_buf[[b, t, y, x]];
                    }
                    fill_special_vars(
                        &mut env,
                        nb,
                        st_ref,
                        it * ct + t,
                        iy * cy + y,
                        ix * cx + x,
                    );
                    for (i, (_, expr)) in self.exprs.iter().enumerate() {
                        buf[[i, t, y, x]] = expr.eval(&env);
                    }
                }
            }
        }

        Ok(out)
    }

    fn to_json(&self) -> Result<Value> {
        let exprs: Vec<&str> = self.exprs.iter().map(|(src, _)| src.as_str()).collect();
        let mut out = json!({
            "cube_type": "apply_pixel",
            "expr": exprs,
            "in_cube": self.in_cube.to_json()?,
        });
        if self.band_names_given {
            out["band_names"] = json!(self.bands.names());
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::dummy::DummyCube;
    use crate::ops::join_bands::JoinBandsCube;
    use crate::testing::view;

    fn two_band_cube(b1: f64, b2: f64) -> Arc<dyn Cube> {
        let a = DummyCube::create(view(2, 2, 1), 1, b1).unwrap();
        a.set_chunk_size([1, 2, 2]);
        let b = DummyCube::create(view(2, 2, 1), 1, b2).unwrap();
        b.set_chunk_size([1, 2, 2]);
        JoinBandsCube::create(a as Arc<dyn Cube>, b as Arc<dyn Cube>, "A", "B").unwrap()
            as Arc<dyn Cube>
    }

    #[test]
    fn test_sum_and_product_bands() {
        let c = two_band_cube(2.0, 3.0);
        let applied = ApplyPixelCube::create(
            c,
            vec!["A_band1 + B_band1".to_string(), "A_band1 * B_band1".to_string()],
            Some(vec!["s".to_string(), "p".to_string()]),
        )
        .unwrap();
        assert_eq!(applied.bands().names(), vec!["s", "p"]);

        let chunk = applied.read_chunk(0).unwrap();
        let buf = chunk.buf().unwrap();
        assert!(buf.slice(ndarray::s![0, .., .., ..]).iter().all(|v| *v == 5.0));
        assert!(buf.slice(ndarray::s![1, .., .., ..]).iter().all(|v| *v == 6.0));
    }

    #[test]
    fn test_default_band_names() {
        let c = DummyCube::create(view(2, 2, 1), 1, 1.0).unwrap();
        let applied =
            ApplyPixelCube::create(c as Arc<dyn Cube>, vec!["band1".to_string()], None).unwrap();
        assert_eq!(applied.bands().names(), vec!["band1"]);
    }

    #[test]
    fn test_special_variables() {
        let c = DummyCube::create(view(3, 3, 1), 1, 0.0).unwrap();
        c.set_chunk_size([1, 3, 3]);
        let applied = ApplyPixelCube::create(
            c as Arc<dyn Cube>,
            vec!["ix + 10 * iy".to_string(), "x".to_string(), "top".to_string()],
            None,
        )
        .unwrap();

        let chunk = applied.read_chunk(0).unwrap();
        let buf = chunk.buf().unwrap();
        assert_eq!(buf[[0, 0, 0, 0]], 0.0);
        assert_eq!(buf[[0, 0, 0, 2]], 2.0);
        assert_eq!(buf[[0, 0, 2, 1]], 21.0);
        // Pixel centers of a unit grid over [0, 3]
        assert_eq!(buf[[1, 0, 0, 0]], 0.5);
        assert_eq!(buf[[1, 0, 0, 2]], 2.5);
        // Cell edge of the first row
        assert_eq!(buf[[2, 0, 0, 0]], 3.0);
    }

    #[test]
    fn test_unknown_band_fails_at_construction() {
        let c = DummyCube::create(view(2, 2, 1), 1, 1.0).unwrap();
        assert!(
            ApplyPixelCube::create(c as Arc<dyn Cube>, vec!["nope + 1".to_string()], None)
                .is_err()
        );
    }

    #[test]
    fn test_division_by_zero_is_nan() {
        let c = DummyCube::create(view(2, 2, 1), 1, 1.0).unwrap();
        let applied = ApplyPixelCube::create(
            c as Arc<dyn Cube>,
            vec!["band1 / (band1 - 1)".to_string()],
            None,
        )
        .unwrap();
        let chunk = applied.read_chunk(0).unwrap();
        assert!(chunk.buf().unwrap().iter().all(|v| v.is_nan()));
    }
}
