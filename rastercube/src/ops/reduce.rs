//! The per-band streaming reducer vocabulary shared by reduce_time,
//! reduce_space and window_time.
//!
//! Reducers follow a pairwise protocol: `init` prepares the output slots and
//! any per-pixel auxiliary state, `combine` folds one input chunk at a time
//! in parent order, `finalize` post-processes (eg divides by the count).
//! This lets a reduction run without ever materializing its full input
//! domain. NaN inputs never contribute; see the per-reducer contracts below.

use ndarray::{Array2, Array4};

use crate::chunk::ChunkData;
use crate::errors::{Error, Result};

/// A named streaming aggregator.
///
/// Numeric contracts over the non-NaN inputs of one output cell:
/// sum (empty input → 0), prod (empty → 1), count, mean (empty → NaN),
/// min/max (empty → NaN), median (exact, even counts average the two
/// middles), var (Welford, divisor n−1, n ≤ 1 → NaN), sd (√var).
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Prod,
    Count,
    Mean,
    Min,
    Max,
    Median,
    Var,
    Sd,
}

impl Reducer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Prod => "prod",
            Self::Count => "count",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::Var => "var",
            Self::Sd => "sd",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Self::Sum),
            "prod" => Ok(Self::Prod),
            "count" => Ok(Self::Count),
            "mean" => Ok(Self::Mean),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "median" => Ok(Self::Median),
            "var" => Ok(Self::Var),
            "sd" => Ok(Self::Sd),
            _ => Err(Error::Config(format!("unknown reducer '{s}'"))),
        }
    }

    /// Slot value before any input arrives.
    fn neutral(&self) -> f64 {
        match self {
            Self::Sum | Self::Count => 0.0,
            Self::Prod => 1.0,
            _ => f64::NAN,
        }
    }
}

/// Parse `[(reducer, band_name)]` pairs as they appear in cube JSON.
pub fn parse_reducer_bands(value: &serde_json::Value) -> Result<Vec<(Reducer, String)>> {
    let list = value
        .as_array()
        .ok_or_else(|| Error::Config("reducer_bands must be an array".to_string()))?;

    let mut out = Vec::with_capacity(list.len());
    for entry in list {
        let pair = entry
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| Error::Config("reducer_bands entries must be pairs".to_string()))?;
        let reducer = pair[0]
            .as_str()
            .ok_or_else(|| Error::Config("reducer name must be a string".to_string()))?;
        let band = pair[1]
            .as_str()
            .ok_or_else(|| Error::Config("band name must be a string".to_string()))?;
        out.push((Reducer::from_str(reducer)?, band.to_string()));
    }

    Ok(out)
}

/// Apply a reducer to an explicit list of values, eg one temporal window.
pub(crate) fn reduce_values(kind: Reducer, values: &[f64]) -> f64 {
    let mut slot = kind.neutral();
    let mut count = 0u32;
    let mut mean = 0.0;
    let mut bucket = vec![];

    for &v in values {
        if v.is_nan() {
            continue;
        }
        match kind {
            Reducer::Sum => slot += v,
            Reducer::Prod => slot *= v,
            Reducer::Count => slot += 1.0,
            Reducer::Mean => {
                count += 1;
                if slot.is_nan() {
                    slot = v;
                } else {
                    slot += v;
                }
            }
            Reducer::Min => slot = if slot.is_nan() { v } else { slot.min(v) },
            Reducer::Max => slot = if slot.is_nan() { v } else { slot.max(v) },
            Reducer::Median => bucket.push(v),
            Reducer::Var | Reducer::Sd => {
                count += 1;
                if slot.is_nan() {
                    slot = 0.0;
                }
                let delta = v - mean;
                mean += delta / count as f64;
                slot += delta * (v - mean);
            }
        }
    }

    match kind {
        Reducer::Mean => {
            if count > 0 {
                slot / count as f64
            } else {
                f64::NAN
            }
        }
        Reducer::Var | Reducer::Sd => {
            if count > 1 {
                let var = slot / (count - 1) as f64;
                if kind == Reducer::Sd {
                    var.sqrt()
                } else {
                    var
                }
            } else {
                f64::NAN
            }
        }
        Reducer::Median => median_of(&mut bucket),
        _ => slot,
    }
}

fn median_of(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

enum AuxState {
    Slot,
    Counted { count: Array2<u32> },
    Welford { count: Array2<u32>, mean: Array2<f64> },
    Buckets { buckets: Vec<Vec<f64>> },
}

/// Streaming reducer over the time axis of one band; the output slot is
/// `out[band_out, 0, y, x]`.
///
pub(crate) struct TimeReducer {
    kind: Reducer,
    band_in: usize,
    band_out: usize,
    state: AuxState,
}

impl TimeReducer {
    pub fn new(kind: Reducer, band_in: usize, band_out: usize) -> Self {
        Self {
            kind,
            band_in,
            band_out,
            state: AuxState::Slot,
        }
    }

    pub fn init(&mut self, out: &mut Array4<f64>) {
        let (_, _, ny, nx) = out.dim();
        for y in 0..ny {
            for x in 0..nx {
                out[[self.band_out, 0, y, x]] = self.kind.neutral();
            }
        }
        self.state = match self.kind {
            Reducer::Mean => AuxState::Counted {
                count: Array2::zeros((ny, nx)),
            },
            Reducer::Var | Reducer::Sd => AuxState::Welford {
                count: Array2::zeros((ny, nx)),
                mean: Array2::zeros((ny, nx)),
            },
            Reducer::Median => AuxState::Buckets {
                buckets: vec![vec![]; ny * nx],
            },
            _ => AuxState::Slot,
        };
    }

    pub fn combine(&mut self, out: &mut Array4<f64>, chunk: &ChunkData, _chunk_id: u32) {
        let buf = match chunk.buf() {
            Some(buf) => buf,
            None => return,
        };
        let (_, st, ny, nx) = buf.dim();

        for t in 0..st {
            for y in 0..ny {
                for x in 0..nx {
                    let v = buf[[self.band_in, t, y, x]];
                    if v.is_nan() {
                        continue;
                    }
                    let slot = &mut out[[self.band_out, 0, y, x]];
                    match &mut self.state {
                        AuxState::Slot => match self.kind {
                            Reducer::Sum => *slot += v,
                            Reducer::Prod => *slot *= v,
                            Reducer::Count => *slot += 1.0,
                            Reducer::Min => {
                                *slot = if slot.is_nan() { v } else { slot.min(v) }
                            }
                            Reducer::Max => {
                                *slot = if slot.is_nan() { v } else { slot.max(v) }
                            }
                            _ => unreachable!(),
                        },
                        AuxState::Counted { count } => {
                            let c = &mut count[[y, x]];
                            *c += 1;
                            *slot = if slot.is_nan() { v } else { *slot + v };
                        }
                        AuxState::Welford { count, mean } => {
                            let c = &mut count[[y, x]];
                            *c += 1;
                            if slot.is_nan() {
                                *slot = 0.0;
                            }
                            let m = &mut mean[[y, x]];
                            let delta = v - *m;
                            *m += delta / *c as f64;
                            *slot += delta * (v - *m);
                        }
                        AuxState::Buckets { buckets } => buckets[y * nx + x].push(v),
                    }
                }
            }
        }
    }

    pub fn finalize(&mut self, out: &mut Array4<f64>) {
        let (_, _, ny, nx) = out.dim();
        match &mut self.state {
            AuxState::Slot => {}
            AuxState::Counted { count } => {
                for y in 0..ny {
                    for x in 0..nx {
                        let slot = &mut out[[self.band_out, 0, y, x]];
                        let c = count[[y, x]];
                        *slot = if c > 0 { *slot / c as f64 } else { f64::NAN };
                    }
                }
            }
            AuxState::Welford { count, .. } => {
                for y in 0..ny {
                    for x in 0..nx {
                        let slot = &mut out[[self.band_out, 0, y, x]];
                        let c = count[[y, x]];
                        *slot = if c > 1 {
                            let var = *slot / (c - 1) as f64;
                            if self.kind == Reducer::Sd {
                                var.sqrt()
                            } else {
                                var
                            }
                        } else {
                            f64::NAN
                        };
                    }
                }
            }
            AuxState::Buckets { buckets } => {
                for y in 0..ny {
                    for x in 0..nx {
                        out[[self.band_out, 0, y, x]] = median_of(&mut buckets[y * nx + x]);
                    }
                }
            }
        }
    }
}

/// Streaming reducer over both spatial axes of one band; the output slot is
/// `out[band_out, t, 0, 0]`.
///
pub(crate) struct SpaceReducer {
    kind: Reducer,
    band_in: usize,
    band_out: usize,
    count: Vec<u32>,
    mean: Vec<f64>,
    buckets: Vec<Vec<f64>>,
}

impl SpaceReducer {
    pub fn new(kind: Reducer, band_in: usize, band_out: usize) -> Self {
        Self {
            kind,
            band_in,
            band_out,
            count: vec![],
            mean: vec![],
            buckets: vec![],
        }
    }

    pub fn init(&mut self, out: &mut Array4<f64>) {
        let st = out.dim().1;
        for t in 0..st {
            out[[self.band_out, t, 0, 0]] = self.kind.neutral();
        }
        self.count = vec![0; st];
        self.mean = vec![0.0; st];
        self.buckets = vec![vec![]; st];
    }

    pub fn combine(&mut self, out: &mut Array4<f64>, chunk: &ChunkData, _chunk_id: u32) {
        let buf = match chunk.buf() {
            Some(buf) => buf,
            None => return,
        };
        let (_, st, ny, nx) = buf.dim();

        for t in 0..st {
            let slot = &mut out[[self.band_out, t, 0, 0]];
            for y in 0..ny {
                for x in 0..nx {
                    let v = buf[[self.band_in, t, y, x]];
                    if v.is_nan() {
                        continue;
                    }
                    match self.kind {
                        Reducer::Sum => *slot += v,
                        Reducer::Prod => *slot *= v,
                        Reducer::Count => *slot += 1.0,
                        Reducer::Min => *slot = if slot.is_nan() { v } else { slot.min(v) },
                        Reducer::Max => *slot = if slot.is_nan() { v } else { slot.max(v) },
                        Reducer::Mean => {
                            self.count[t] += 1;
                            *slot = if slot.is_nan() { v } else { *slot + v };
                        }
                        Reducer::Var | Reducer::Sd => {
                            self.count[t] += 1;
                            if slot.is_nan() {
                                *slot = 0.0;
                            }
                            let delta = v - self.mean[t];
                            self.mean[t] += delta / self.count[t] as f64;
                            *slot += delta * (v - self.mean[t]);
                        }
                        Reducer::Median => self.buckets[t].push(v),
                    }
                }
            }
        }
    }

    pub fn finalize(&mut self, out: &mut Array4<f64>) {
        let st = out.dim().1;
        for t in 0..st {
            let slot = &mut out[[self.band_out, t, 0, 0]];
            match self.kind {
                Reducer::Mean => {
                    let c = self.count[t];
                    *slot = if c > 0 { *slot / c as f64 } else { f64::NAN };
                }
                Reducer::Var | Reducer::Sd => {
                    let c = self.count[t];
                    *slot = if c > 1 {
                        let var = *slot / (c - 1) as f64;
                        if self.kind == Reducer::Sd {
                            var.sqrt()
                        } else {
                            var
                        }
                    } else {
                        f64::NAN
                    };
                }
                Reducer::Median => *slot = median_of(&mut self.buckets[t]),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_values_contracts() {
        let nan = f64::NAN;
        assert_eq!(reduce_values(Reducer::Sum, &[1.0, nan, 2.0]), 3.0);
        assert_eq!(reduce_values(Reducer::Sum, &[nan, nan]), 0.0);
        assert_eq!(reduce_values(Reducer::Prod, &[2.0, 3.0]), 6.0);
        assert_eq!(reduce_values(Reducer::Prod, &[]), 1.0);
        assert_eq!(reduce_values(Reducer::Count, &[1.0, nan, 2.0]), 2.0);
        assert_eq!(reduce_values(Reducer::Mean, &[1.0, nan, 3.0]), 2.0);
        assert!(reduce_values(Reducer::Mean, &[nan]).is_nan());
        assert_eq!(reduce_values(Reducer::Min, &[3.0, 1.0, nan]), 1.0);
        assert_eq!(reduce_values(Reducer::Max, &[3.0, 1.0, nan]), 3.0);
        assert!(reduce_values(Reducer::Min, &[]).is_nan());
    }

    #[test]
    fn test_median_contracts() {
        assert_eq!(reduce_values(Reducer::Median, &[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(reduce_values(Reducer::Median, &[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert!(reduce_values(Reducer::Median, &[]).is_nan());
    }

    #[test]
    fn test_variance_contracts() {
        let var = reduce_values(Reducer::Var, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((var - 2.5).abs() < 1e-12);
        let sd = reduce_values(Reducer::Sd, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((sd - 2.5f64.sqrt()).abs() < 1e-12);
        assert!(reduce_values(Reducer::Var, &[1.0]).is_nan());
        assert!(reduce_values(Reducer::Sd, &[]).is_nan());
    }

    #[test]
    fn test_reducer_names() {
        for name in [
            "sum", "prod", "count", "mean", "min", "max", "median", "var", "sd",
        ] {
            assert_eq!(Reducer::from_str(name).unwrap().as_str(), name);
        }
        assert!(Reducer::from_str("mode").is_err());
    }

    #[test]
    fn test_parse_reducer_bands() {
        let value = serde_json::json!([["mean", "B04"], ["sum", "B08"]]);
        let pairs = parse_reducer_bands(&value).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], (Reducer::Mean, "B04".to_string()));
        assert!(parse_reducer_bands(&serde_json::json!([["nope", "B04"]])).is_err());
        assert!(parse_reducer_bands(&serde_json::json!("mean")).is_err());
    }
}
