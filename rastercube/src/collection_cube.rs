//! The leaf cube that reads, warps and temporally aggregates imagery from
//! an image collection.
//!
//! For each chunk the reader queries the collection for intersecting
//! (dataset, band) rows, opens each contributing raster once, warps it onto
//! the chunk grid through the geospatial backend, places it on the time axis
//! by integer division of the acquisition offset by `dt`, and resolves
//! acquisitions that fall into the same slice with the view's aggregation
//! method. An optional per-pixel mask band invalidates pixels of each
//! contributing image before it is aggregated.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{s, Array2, Array4, ArrayView2, ArrayViewMut2};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::band::BandCollection;
use crate::chunk::{ChunkData, ChunkId};
use crate::collection::{FindRangeStRow, ImageCollection};
use crate::cube::{Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::reference::{Aggregation, CubeView, StReference};
use crate::time::DateTime;
use crate::warp::{sanitize_warp_args, RasterBackend, WarpArgs};

/// Default chunk size of image collection cubes, `(t, y, x)`.
pub const DEFAULT_CHUNK_SIZE: [usize; 3] = [16, 256, 256];

/// A per-pixel predicate over a designated mask band. Pixels where the
/// predicate triggers are set to NaN across all bands of the same image.
///
#[derive(Clone, Debug, PartialEq)]
pub enum ImageMask {
    /// Mask where the mask band value is in `values` (or not in, if
    /// inverted).
    Value { values: Vec<f64>, invert: bool },

    /// Mask where `min <= value <= max` (or outside, if inverted).
    Range { min: f64, max: f64, invert: bool },
}

impl ImageMask {
    fn triggers(&self, v: f64) -> bool {
        match self {
            Self::Value { values, invert } => values.contains(&v) != *invert,
            Self::Range { min, max, invert } => {
                if *invert {
                    v < *min || v > *max
                } else {
                    *min <= v && v <= *max
                }
            }
        }
    }

    /// Invalidate every pixel of `planes` where the mask band triggers.
    pub fn apply(&self, mask: ArrayView2<f64>, planes: &mut [Array2<f64>]) {
        for ((y, x), &m) in mask.indexed_iter() {
            if self.triggers(m) {
                for plane in planes.iter_mut() {
                    plane[[y, x]] = f64::NAN;
                }
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Value { values, invert } => json!({
                "mask_type": "value_mask",
                "values": values,
                "invert": invert,
            }),
            Self::Range { min, max, invert } => json!({
                "mask_type": "range_mask",
                "min": min,
                "max": max,
                "invert": invert,
            }),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let mask_type = value
            .get("mask_type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Config("mask description is missing mask_type".to_string()))?;
        let invert = value
            .get("invert")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match mask_type {
            "value_mask" => {
                let values = value
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|vs| vs.iter().filter_map(Value::as_f64).collect())
                    .ok_or_else(|| Error::Config("value_mask is missing values".to_string()))?;
                Ok(Self::Value { values, invert })
            }
            "range_mask" => {
                let min = value
                    .get("min")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| Error::Config("range_mask is missing min".to_string()))?;
                let max = value
                    .get("max")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| Error::Config("range_mask is missing max".to_string()))?;
                Ok(Self::Range { min, max, invert })
            }
            other => Err(Error::Config(format!("unknown mask type '{other}'"))),
        }
    }
}

/// Streaming state for combining acquisitions that share a time slice.
///
/// Slots start as NaN; NaN inputs never contribute. Per-pixel bookkeeping is
/// spawned lazily, keyed on `(band, slice)`, so sparse chunks stay cheap.
///
enum AggregationState {
    None,
    Min,
    Max,
    Mean {
        counts: HashMap<(usize, usize), Array2<u32>>,
    },
    Median {
        buckets: HashMap<(usize, usize), Vec<Vec<f64>>>,
    },
    First,
    Last,
}

impl AggregationState {
    fn new(method: Aggregation) -> Self {
        match method {
            Aggregation::None => Self::None,
            Aggregation::Min => Self::Min,
            Aggregation::Max => Self::Max,
            Aggregation::Mean => Self::Mean {
                counts: HashMap::new(),
            },
            Aggregation::Median => Self::Median {
                buckets: HashMap::new(),
            },
            Aggregation::First => Self::First,
            Aggregation::Last => Self::Last,
        }
    }

    fn update(
        &mut self,
        mut slot: ArrayViewMut2<f64>,
        img: ArrayView2<f64>,
        band: usize,
        slice: usize,
    ) {
        match self {
            Self::None => slot.assign(&img),
            Self::Min => {
                for ((y, x), &v) in img.indexed_iter() {
                    if v.is_nan() {
                        continue;
                    }
                    let w = &mut slot[[y, x]];
                    *w = if w.is_nan() { v } else { w.min(v) };
                }
            }
            Self::Max => {
                for ((y, x), &v) in img.indexed_iter() {
                    if v.is_nan() {
                        continue;
                    }
                    let w = &mut slot[[y, x]];
                    *w = if w.is_nan() { v } else { w.max(v) };
                }
            }
            Self::Mean { counts } => {
                let count = counts
                    .entry((band, slice))
                    .or_insert_with(|| Array2::zeros(img.raw_dim()));
                for ((y, x), &v) in img.indexed_iter() {
                    if v.is_nan() {
                        continue;
                    }
                    let c = &mut count[[y, x]];
                    *c += 1;
                    let w = &mut slot[[y, x]];
                    if w.is_nan() {
                        *w = v;
                    } else {
                        *w += (v - *w) / *c as f64;
                    }
                }
            }
            Self::Median { buckets } => {
                let (ny, nx) = img.dim();
                let bucket = buckets
                    .entry((band, slice))
                    .or_insert_with(|| vec![vec![]; ny * nx]);
                for ((y, x), &v) in img.indexed_iter() {
                    if !v.is_nan() {
                        bucket[y * nx + x].push(v);
                    }
                }
            }
            Self::First => {
                for ((y, x), &v) in img.indexed_iter() {
                    let w = &mut slot[[y, x]];
                    if w.is_nan() && !v.is_nan() {
                        *w = v;
                    }
                }
            }
            Self::Last => {
                for ((y, x), &v) in img.indexed_iter() {
                    if !v.is_nan() {
                        slot[[y, x]] = v;
                    }
                }
            }
        }
    }

    fn finalize(&mut self, buf: &mut Array4<f64>) {
        if let Self::Median { buckets } = self {
            let nx = buf.dim().3;
            for (&(band, slice), bucket) in buckets.iter_mut() {
                for (p, values) in bucket.iter_mut().enumerate() {
                    let out = &mut buf[[band, slice, p / nx, p % nx]];
                    if values.is_empty() {
                        *out = f64::NAN;
                        continue;
                    }
                    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
                    let mid = values.len() / 2;
                    *out = if values.len() % 2 == 1 {
                        values[mid]
                    } else {
                        (values[mid - 1] + values[mid]) / 2.0
                    };
                }
            }
        }
    }
}

/// A data cube fed by an image collection through a cube view.
///
pub struct ImageCollectionCube {
    base: CubeBase,
    collection: Arc<dyn ImageCollection>,
    backend: Arc<dyn RasterBackend>,
    view: CubeView,
    chunk_size: Mutex<[usize; 3]>,
    input_bands: BandCollection,
    bands: BandCollection,
    mask: Mutex<Option<(String, ImageMask)>>,
    warp_extra: Mutex<Vec<String>>,
}

impl ImageCollectionCube {
    /// Create a cube over all bands of the collection.
    pub fn create(
        collection: Arc<dyn ImageCollection>,
        backend: Arc<dyn RasterBackend>,
        view: CubeView,
    ) -> Result<Arc<Self>> {
        Self::create_with_bands(collection, backend, view, &[])
    }

    /// Create a cube over a band subset; an empty selection means all bands.
    pub fn create_with_bands(
        collection: Arc<dyn ImageCollection>,
        backend: Arc<dyn RasterBackend>,
        view: CubeView,
        band_names: &[String],
    ) -> Result<Arc<Self>> {
        let mut input_bands = BandCollection::new();
        for band in collection.get_bands()? {
            input_bands.add(band)?;
        }
        if input_bands.count() == 0 {
            return Err(Error::Config(
                "image collection does not contain any bands".to_string(),
            ));
        }

        let mut bands = BandCollection::new();
        if band_names.is_empty() {
            for band in input_bands.iter() {
                bands.add(band.clone())?;
            }
        } else {
            for name in band_names {
                let idx = input_bands.get_index(name)?;
                bands.add(input_bands.get(idx).clone())?;
            }
        }

        Ok(Arc::new(Self {
            base: CubeBase::new(),
            collection,
            backend,
            view,
            chunk_size: Mutex::new(DEFAULT_CHUNK_SIZE),
            input_bands,
            bands,
            mask: Mutex::new(None),
            warp_extra: Mutex::new(vec![]),
        }))
    }

    pub fn collection(&self) -> &Arc<dyn ImageCollection> {
        &self.collection
    }

    pub fn view(&self) -> &CubeView {
        &self.view
    }

    /// The image collection cube is the only cube whose chunk size may be
    /// changed after construction; streaming workloads depend on this.
    pub fn set_chunk_size(&self, size: [usize; 3]) {
        *self.chunk_size.lock() = size;
    }

    /// Configure a mask band. Warns and leaves the mask untouched when the
    /// band does not exist in the collection.
    pub fn set_mask(&self, band: &str, mask: ImageMask) {
        if !self.input_bands.has(band) {
            warn!(
                band,
                "band does not exist in image collection, image mask will not be modified"
            );
            return;
        }
        *self.mask.lock() = Some((band.to_string(), mask));
    }

    /// Additional user warp arguments, eg performance settings; arguments
    /// that would override engine-controlled flags are dropped.
    pub fn set_warp_args(&self, args: &[String]) {
        *self.warp_extra.lock() = sanitize_warp_args(args);
    }

    /// Group contiguous rows that share a descriptor; each group is one
    /// source raster.
    fn batches(rows: &[FindRangeStRow]) -> Vec<&[FindRangeStRow]> {
        let mut out = vec![];
        let mut start = 0;
        for i in 1..=rows.len() {
            if i == rows.len() || rows[i].descriptor != rows[start].descriptor {
                out.push(&rows[start..i]);
                start = i;
            }
        }
        out
    }
}

impl Cube for ImageCollectionCube {
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
        debug!(id, "image_collection_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let shape = self.chunk_shape(id);
        let bounds = self.bounds_from_chunk(id);

        let rows = self.collection.find_range_st(&bounds)?;
        if rows.is_empty() {
            return Ok(ChunkData::empty(shape));
        }

        let st = self.st_reference();
        let dt = st.dt();
        let args = WarpArgs {
            t_srs: st.srs().to_string(),
            te: bounds.s,
            te_srs: st.srs().to_string(),
            ts: (shape[3], shape[2]),
            r: self.view.resampling(),
            src_nodata: None,
            extra: self.warp_extra.lock().clone(),
        };
        let mask = self.mask.lock().clone();

        let mut out = ChunkData::empty(shape);
        let buf = out.materialize();
        let mut agg = AggregationState::new(self.view.aggregation());

        for batch in Self::batches(&rows) {
            // (output band index, source band number) for the selected bands
            // this raster contributes
            let mut band_rels: Vec<(usize, u16)> = vec![];
            let mut mask_num = None;
            for row in batch {
                if let Ok(idx) = self.bands.get_index(&row.band_name) {
                    band_rels.push((idx, row.band_num));
                }
                if let Some((mask_band, _)) = &mask {
                    if &row.band_name == mask_band {
                        mask_num = Some(row.band_num);
                    }
                }
            }
            if band_rels.is_empty() {
                continue;
            }

            let slice = {
                let img_time = DateTime::from_string(&batch[0].datetime)?;
                if img_time.unit() > dt.unit {
                    trace!(datetime = %img_time, "image datetime coarsened to the unit of dt");
                }
                let offset = img_time.truncated(dt.unit) - bounds.t.t0;
                let slice = offset.num_steps(&dt);
                if slice < 0 || slice as usize >= shape[1] {
                    continue;
                }
                slice as usize
            };

            let mut args = args.clone();
            args.src_nodata = self.input_bands.get(
                self.input_bands
                    .get_index(&batch[0].band_name)
                    .unwrap_or(0),
            ).no_data;

            let mut band_nums: Vec<u16> = band_rels.iter().map(|(_, num)| *num).collect();
            if let Some(num) = mask_num {
                band_nums.push(num);
            }

            let raster = self
                .backend
                .open(&batch[0].descriptor)
                .map_err(|e| Error::Gdal(format!("cannot open '{}': {e}", batch[0].descriptor)))?;
            let mut planes = raster
                .warp(&args, &band_nums)
                .map_err(|e| Error::Gdal(format!("cannot warp '{}': {e}", batch[0].descriptor)))?;

            if let (Some((_, mask)), Some(_)) = (&mask, mask_num) {
                let mask_plane = planes.pop().expect("mask plane was requested");
                mask.apply(mask_plane.view(), &mut planes);
            }

            for ((band_idx, _), plane) in band_rels.iter().zip(planes.iter()) {
                let slot = buf.slice_mut(s![*band_idx, slice, .., ..]);
                agg.update(slot, plane.view(), *band_idx, slice);
            }
        }

        agg.finalize(buf);

        Ok(out)
    }

    fn to_json(&self) -> Result<Value> {
        if self.collection.is_temporary() {
            return Err(Error::Config(
                "image collection is temporary, export it to a file before serializing"
                    .to_string(),
            ));
        }

        let chunk_size = self.chunk_size();
        let warp_args = self.warp_extra.lock().clone();
        let mut out = json!({
            "cube_type": "image_collection",
            "file": self.collection.filename(),
            "view": self.view.to_json(),
            "chunk_size": [chunk_size[0], chunk_size[1], chunk_size[2]],
            "warp_args": warp_args,
        });
        if self.bands.count() != self.input_bands.count() {
            out["bands"] = json!(self.bands.names());
        }
        if let Some((band, mask)) = &*self.mask.lock() {
            out["mask"] = mask.to_json();
            out["mask_band"] = json!(band);
        }

        Ok(out)
    }
}
