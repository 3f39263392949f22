//! Interface to the geospatial backend that opens and warps source rasters.
//!
//! The engine never touches raster files itself; it issues warp parameter
//! sets against this trait pair and receives dense `f64` planes aligned with
//! the target chunk grid. A GDAL-backed implementation lives outside this
//! crate; tests wire in a synthetic one.

use ndarray::Array2;
use tracing::warn;

use crate::errors::Result;
use crate::geom::BoundsS;
use crate::reference::Resampling;

/// Flags the engine controls; user-supplied extras may not override them.
const RESERVED_FLAGS: [&str; 10] = [
    "-of",
    "-t_srs",
    "-te",
    "-te_srs",
    "-ts",
    "-r",
    "-srcnodata",
    "-dstnodata",
    "-ot",
    "-overwrite",
];

/// One warp request: crop to `te` (expressed in `te_srs`), reproject to
/// `t_srs`, resample onto a `ts = (nx, ny)` grid of Float64 with NaN as
/// destination nodata.
///
#[derive(Clone, Debug)]
pub struct WarpArgs {
    pub t_srs: String,
    pub te: BoundsS,
    pub te_srs: String,
    pub ts: (usize, usize),
    pub r: Resampling,
    pub src_nodata: Option<f64>,
    pub extra: Vec<String>,
}

impl WarpArgs {
    /// Render as a gdalwarp-style argument list.
    pub fn to_arg_list(&self) -> Vec<String> {
        let mut args = vec![
            "-t_srs".to_string(),
            self.t_srs.clone(),
            "-te".to_string(),
            self.te.left.to_string(),
            self.te.bottom.to_string(),
            self.te.right.to_string(),
            self.te.top.to_string(),
            "-te_srs".to_string(),
            self.te_srs.clone(),
            "-ts".to_string(),
            self.ts.0.to_string(),
            self.ts.1.to_string(),
            "-r".to_string(),
            self.r.as_str().to_string(),
            "-dstnodata".to_string(),
            "nan".to_string(),
            "-ot".to_string(),
            "Float64".to_string(),
            "-overwrite".to_string(),
        ];
        if let Some(nodata) = self.src_nodata {
            args.push("-srcnodata".to_string());
            args.push(nodata.to_string());
        }
        args.extend(self.extra.iter().cloned());

        args
    }
}

/// Drop user warp arguments that would override an engine-controlled flag.
///
/// Returns the sanitized list; dropped flags are logged. A flag's values
/// (everything up to the next `-` argument) are dropped with it.
///
pub fn sanitize_warp_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut skipping = false;
    for arg in args {
        if arg.starts_with('-') {
            skipping = RESERVED_FLAGS.contains(&arg.as_str());
            if skipping {
                warn!(flag = %arg, "user warp argument overrides an engine flag and is ignored");
                continue;
            }
        }
        if !skipping {
            out.push(arg.clone());
        }
    }

    out
}

/// Opens source rasters by their catalog descriptor.
///
/// Implementations own the library-level caches and thread pools; they are
/// expected to take a [`crate::Config`] at construction to bound them.
pub trait RasterBackend: Send + Sync {
    fn open(&self, descriptor: &str) -> Result<Box<dyn SourceRaster + '_>>;
}

/// One opened source raster.
pub trait SourceRaster {
    /// Warp the given one-based source bands onto the target grid, one
    /// `(ny, nx)` plane per requested band, NaN where the source has no
    /// data. Failures abort the surrounding chunk read.
    fn warp(&self, args: &WarpArgs, band_nums: &[u16]) -> Result<Vec<Array2<f64>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> WarpArgs {
        WarpArgs {
            t_srs: "EPSG:4326".to_string(),
            te: BoundsS::new(0.0, 4.0, 6.0, 10.0),
            te_srs: "EPSG:4326".to_string(),
            ts: (4, 4),
            r: Resampling::Bilinear,
            src_nodata: Some(0.0),
            extra: vec![],
        }
    }

    #[test]
    fn test_arg_list() {
        let list = args().to_arg_list();
        let joined = list.join(" ");
        assert!(joined.contains("-t_srs EPSG:4326"));
        assert!(joined.contains("-te 0 6 4 10"));
        assert!(joined.contains("-ts 4 4"));
        assert!(joined.contains("-r bilinear"));
        assert!(joined.contains("-dstnodata nan"));
        assert!(joined.contains("-ot Float64"));
        assert!(joined.contains("-srcnodata 0"));
        assert!(joined.contains("-overwrite"));
    }

    #[test]
    fn test_sanitize_drops_reserved() {
        let extras = vec![
            "-wo".to_string(),
            "NUM_THREADS=4".to_string(),
            "-ot".to_string(),
            "Int16".to_string(),
            "-multi".to_string(),
        ];
        let kept = sanitize_warp_args(&extras);
        assert_eq!(kept, vec!["-wo", "NUM_THREADS=4", "-multi"]);
    }
}
