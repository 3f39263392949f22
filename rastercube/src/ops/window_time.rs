use std::sync::Arc;

use ndarray::{s, Array4};
use serde_json::{json, Value};
use tracing::debug;

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::ops::reduce::{reduce_values, Reducer};
use crate::reference::StReference;

enum WindowOp {
    /// One output band per pair; the reducer folds the values inside each
    /// moving window.
    Reducers(Vec<(Reducer, String, usize)>),

    /// Centered dot product; NaN inputs and out-of-range slices drop the
    /// weights they would have consumed.
    Kernel(Vec<f64>),
}

/// Applies a moving temporal window `[t - l, t + r]` at every slice, either
/// reducing it per band pair or convolving it with a kernel. Geometry and
/// chunking stay those of the input.
///
pub struct WindowTimeCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    st: StReference,
    bands: BandCollection,
    win_l: usize,
    win_r: usize,
    op: WindowOp,
}

impl WindowTimeCube {
    pub fn create_reduce(
        in_cube: Arc<dyn Cube>,
        reducer_bands: Vec<(Reducer, String)>,
        win_l: usize,
        win_r: usize,
    ) -> Result<Arc<Self>> {
        if reducer_bands.is_empty() {
            return Err(Error::Config(
                "window_time needs at least one (reducer, band) pair".to_string(),
            ));
        }

        let mut bands = BandCollection::new();
        let mut pairs = vec![];
        for (reducer, name) in reducer_bands {
            let idx = in_cube.bands().get_index(&name)?;
            let mut band = in_cube.bands().get(idx).clone();
            band.name = format!("{}_{}", band.name, reducer.as_str());
            bands.add(band)?;
            pairs.push((reducer, name, idx));
        }

        Ok(Self::wire(in_cube, bands, win_l, win_r, WindowOp::Reducers(pairs)))
    }

    pub fn create_kernel(
        in_cube: Arc<dyn Cube>,
        kernel: Vec<f64>,
        win_l: usize,
        win_r: usize,
    ) -> Result<Arc<Self>> {
        if kernel.len() != win_l + win_r + 1 {
            return Err(Error::Config(format!(
                "kernel length {} does not match window size {}",
                kernel.len(),
                win_l + win_r + 1
            )));
        }

        let mut bands = BandCollection::new();
        for band in in_cube.bands().iter() {
            bands.add(band.clone())?;
        }

        Ok(Self::wire(in_cube, bands, win_l, win_r, WindowOp::Kernel(kernel)))
    }

    fn wire(
        in_cube: Arc<dyn Cube>,
        bands: BandCollection,
        win_l: usize,
        win_r: usize,
        op: WindowOp,
    ) -> Arc<Self> {
        let out = Arc::new(Self {
            base: CubeBase::new(),
            st: in_cube.st_reference().clone(),
            bands,
            win_l,
            win_r,
            op,
            in_cube,
        });
        link_child(&out.in_cube, &(Arc::clone(&out) as Arc<dyn Cube>));

        out
    }

    /// Assemble the input slices `[g0, g1)` of this chunk's (iy, ix) column
    /// into one contiguous scratch buffer.
    fn gather(
        &self,
        iy: usize,
        ix: usize,
        g0: usize,
        g1: usize,
        sy: usize,
        sx: usize,
    ) -> Result<Array4<f64>> {
        let nb = self.in_cube.size_bands();
        let ct = self.in_cube.chunk_size()[0];
        let per_slice = self.in_cube.count_chunks_y() * self.in_cube.count_chunks_x();
        let col = iy * self.in_cube.count_chunks_x() + ix;

        let mut scratch = Array4::from_elem([nb, g1 - g0, sy, sx], f64::NAN);
        for it in g0 / ct..=(g1 - 1) / ct {
            let in_id = (it * per_slice + col) as ChunkId;
            let chunk = self.in_cube.read_chunk(in_id)?;
            let buf = match chunk.buf() {
                Some(buf) => buf,
                None => continue,
            };

            // Overlap of this input chunk's slices with [g0, g1)
            let chunk_t0 = it * ct;
            let st = chunk.size()[1];
            let from = g0.max(chunk_t0);
            let to = g1.min(chunk_t0 + st);
            scratch
                .slice_mut(s![.., from - g0..to - g0, .., ..])
                .assign(&buf.slice(s![.., from - chunk_t0..to - chunk_t0, .., ..]));
        }

        Ok(scratch)
    }
}

impl Cube for WindowTimeCube {
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
        self.in_cube.chunk_size()
    }

    fn read_chunk(&self, id: ChunkId) -> Result<ChunkData> {
        debug!(id, "window_time_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let [it, iy, ix] = self.chunk_coords_from_id(id);
        let shape = self.chunk_shape(id);
        let [_, st, sy, sx] = shape;
        let ct = self.chunk_size()[0];

        // Global slice range the windows of this chunk reach into
        let g0 = (it * ct).saturating_sub(self.win_l);
        let g1 = (it * ct + st + self.win_r).min(self.size_t());
        let scratch = self.gather(iy, ix, g0, g1, sy, sx)?;

        let mut out = ChunkData::empty(shape);
        let buf = out.materialize();

        for t_out in 0..st {
            let gt = it * ct + t_out;
            let lo = gt.saturating_sub(self.win_l).max(g0);
            let hi = (gt + self.win_r + 1).min(g1);

            match &self.op {
                WindowOp::Reducers(pairs) => {
                    let mut window = Vec::with_capacity(hi - lo);
                    for (out_band, (reducer, _, band_in)) in pairs.iter().enumerate() {
                        for y in 0..sy {
                            for x in 0..sx {
                                window.clear();
                                for g in lo..hi {
                                    window.push(scratch[[*band_in, g - g0, y, x]]);
                                }
                                buf[[out_band, t_out, y, x]] = reduce_values(*reducer, &window);
                            }
                        }
                    }
                }
                WindowOp::Kernel(kernel) => {
                    for band in 0..self.bands.count() {
                        for y in 0..sy {
                            for x in 0..sx {
                                let mut acc = 0.0;
                                for g in lo..hi {
                                    // kernel[win_l] is centered on gt
                                    let k = g + self.win_l - gt;
                                    let v = scratch[[band, g - g0, y, x]];
                                    if !v.is_nan() {
                                        acc += kernel[k] * v;
                                    }
                                }
                                buf[[band, t_out, y, x]] = acc;
                            }
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    fn to_json(&self) -> Result<Value> {
        let mut out = json!({
            "cube_type": "window_time",
            "win_size_l": self.win_l,
            "win_size_r": self.win_r,
            "in_cube": self.in_cube.to_json()?,
        });
        match &self.op {
            WindowOp::Reducers(pairs) => {
                let pairs: Vec<Value> = pairs
                    .iter()
                    .map(|(reducer, band, _)| json!([reducer.as_str(), band]))
                    .collect();
                out["reducer_bands"] = json!(pairs);
            }
            WindowOp::Kernel(kernel) => out["kernel"] = json!(kernel),
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::apply_pixel::ApplyPixelCube;
    use crate::ops::dummy::DummyCube;
    use crate::testing::view;

    /// A single-band cube whose value at slice t is t, chunked one slice per
    /// chunk.
    fn ramp(nt: usize) -> Arc<dyn Cube> {
        let c = DummyCube::create(view(1, 1, nt), 1, 0.0).unwrap();
        c.set_chunk_size([1, 1, 1]);
        ApplyPixelCube::create(
            c as Arc<dyn Cube>,
            vec!["band1 + it".to_string()],
            Some(vec!["band1".to_string()]),
        )
        .unwrap() as Arc<dyn Cube>
    }

    fn series(cube: &dyn Cube) -> Vec<f64> {
        (0..cube.count_chunks() as ChunkId)
            .map(|id| cube.read_chunk(id).unwrap().buf().unwrap()[[0, 0, 0, 0]])
            .collect()
    }

    #[test]
    fn test_moving_mean() {
        let w = WindowTimeCube::create_reduce(
            ramp(5),
            vec![(Reducer::Mean, "band1".to_string())],
            1,
            1,
        )
        .unwrap();
        assert_eq!(w.bands().names(), vec!["band1_mean"]);
        // Values 0..4; windows clamp at the borders
        assert_eq!(series(&*w), vec![0.5, 1.0, 2.0, 3.0, 3.5]);
    }

    #[test]
    fn test_moving_min_asymmetric() {
        let w = WindowTimeCube::create_reduce(
            ramp(4),
            vec![(Reducer::Min, "band1".to_string())],
            2,
            0,
        )
        .unwrap();
        assert_eq!(series(&*w), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_kernel_dot_product() {
        let w =
            WindowTimeCube::create_kernel(ramp(4), vec![0.25, 0.5, 0.25], 1, 1).unwrap();
        assert_eq!(w.bands().names(), vec!["band1"]);
        // Border slices lose the weights of the missing neighbors
        assert_eq!(series(&*w), vec![0.25, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_kernel_length_must_match() {
        assert!(WindowTimeCube::create_kernel(ramp(4), vec![1.0, 1.0], 1, 1).is_err());
    }

    #[test]
    fn test_geometry_unchanged() {
        let w = WindowTimeCube::create_reduce(
            ramp(5),
            vec![(Reducer::Max, "band1".to_string())],
            1,
            1,
        )
        .unwrap();
        assert_eq!(w.size_t(), 5);
        assert_eq!(w.count_chunks(), 5);
    }
}
