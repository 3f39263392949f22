//! The spatiotemporal reference of a cube: a regular pixel grid over a
//! bounding box in some SRS plus a regular time axis, and, for cubes that
//! read from image collections, the resampling and temporal aggregation
//! policy that turns irregular acquisitions into that grid.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Error, Result};
use crate::geom::BoundsS;
use crate::time::{DateTime, Duration};

/// Spatial resampling applied while warping source rasters onto the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resampling {
    Near,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
}

impl Resampling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Near => "near",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::CubicSpline => "cubicspline",
            Self::Lanczos => "lanczos",
            Self::Average => "average",
            Self::Mode => "mode",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "near" => Ok(Self::Near),
            "bilinear" => Ok(Self::Bilinear),
            "cubic" => Ok(Self::Cubic),
            "cubicspline" => Ok(Self::CubicSpline),
            "lanczos" => Ok(Self::Lanczos),
            "average" => Ok(Self::Average),
            "mode" => Ok(Self::Mode),
            _ => Err(Error::Config(format!("unknown resampling method '{s}'"))),
        }
    }
}

/// How acquisitions that fall into the same time slice are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    None,
    Min,
    Max,
    Mean,
    Median,
    First,
    Last,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            _ => Err(Error::Config(format!("unknown aggregation method '{s}'"))),
        }
    }
}

/// The immutable grid definition shared by every cube in a pipeline branch.
///
/// Pixel sizes are derived from the window and the pixel counts, so the grid
/// always tiles the window exactly. The datetime resolution of `t0`/`t1` is
/// coerced to the resolution of `dt` at construction; coarsening truncates
/// and is logged.
///
#[derive(Clone, Debug, PartialEq)]
pub struct StReference {
    win: BoundsS,
    srs: String,
    nx: usize,
    ny: usize,
    t0: DateTime,
    t1: DateTime,
    dt: Duration,
}

impl StReference {
    pub fn new(
        win: BoundsS,
        srs: impl Into<String>,
        nx: usize,
        ny: usize,
        t0: DateTime,
        t1: DateTime,
        dt: Duration,
    ) -> Result<Self> {
        if win.width() <= 0.0 || win.height() <= 0.0 {
            return Err(Error::Config(
                "spatial window must have positive extent".to_string(),
            ));
        }
        if nx == 0 || ny == 0 {
            return Err(Error::Config("pixel grid must not be empty".to_string()));
        }
        if dt.count <= 0 {
            return Err(Error::Config("dt must be a positive duration".to_string()));
        }

        if t0.unit() > dt.unit {
            warn!(t0 = %t0, dt = %dt, "datetime unit of t0 coarsened to the unit of dt");
        }
        let t0 = t0.truncated(dt.unit);
        let t1 = t1.truncated(dt.unit);
        if t1 < t0 {
            return Err(Error::Config(format!("t1 ({t1}) is before t0 ({t0})")));
        }

        Ok(Self {
            win,
            srs: srs.into(),
            nx,
            ny,
            t0,
            t1,
            dt,
        })
    }

    /// Build a reference from target pixel sizes instead of pixel counts;
    /// counts are rounded so that `nx * dx` spans the window.
    pub fn with_pixel_size(
        win: BoundsS,
        srs: impl Into<String>,
        dx: f64,
        dy: f64,
        t0: DateTime,
        t1: DateTime,
        dt: Duration,
    ) -> Result<Self> {
        if dx <= 0.0 || dy <= 0.0 {
            return Err(Error::Config("pixel sizes must be positive".to_string()));
        }
        let nx = (win.width() / dx).round().max(1.0) as usize;
        let ny = (win.height() / dy).round().max(1.0) as usize;

        Self::new(win, srs, nx, ny, t0, t1, dt)
    }

    pub fn win(&self) -> BoundsS {
        self.win
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Number of slices on the time axis; `t1` falls into the last slice.
    pub fn nt(&self) -> usize {
        ((self.t1 - self.t0).num_steps(&self.dt) + 1) as usize
    }

    pub fn dx(&self) -> f64 {
        self.win.width() / self.nx as f64
    }

    pub fn dy(&self) -> f64 {
        self.win.height() / self.ny as f64
    }

    pub fn t0(&self) -> DateTime {
        self.t0
    }

    pub fn t1(&self) -> DateTime {
        self.t1
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }

    /// A copy whose time axis is collapsed to a single slice spanning
    /// `[t0, t1]`; used by time-reducing cubes.
    pub fn collapsed_time(&self) -> Self {
        let span = self.t1 - self.t0;
        let dt = if span.is_zero() { self.dt } else { span };
        Self {
            t1: self.t0,
            dt,
            ..self.clone()
        }
    }

    /// A copy whose spatial axes are collapsed to a single cell spanning the
    /// whole window; used by space-reducing cubes.
    pub fn collapsed_space(&self) -> Self {
        Self {
            nx: 1,
            ny: 1,
            ..self.clone()
        }
    }
}

/// An `StReference` plus the policies needed to read source imagery into it.
///
#[derive(Clone, Debug, PartialEq)]
pub struct CubeView {
    st: StReference,
    resampling: Resampling,
    aggregation: Aggregation,
}

#[derive(Serialize, Deserialize)]
struct SpaceJson {
    left: f64,
    right: f64,
    bottom: f64,
    top: f64,
    srs: String,
    dx: f64,
    dy: f64,
}

#[derive(Serialize, Deserialize)]
struct TimeJson {
    t0: String,
    t1: String,
    dt: String,
}

#[derive(Serialize, Deserialize)]
struct ViewJson {
    space: SpaceJson,
    time: TimeJson,
    resampling: String,
    aggregation: String,
}

impl CubeView {
    pub fn new(st: StReference, resampling: Resampling, aggregation: Aggregation) -> Self {
        Self {
            st,
            resampling,
            aggregation,
        }
    }

    pub fn st_reference(&self) -> &StReference {
        &self.st
    }

    pub fn resampling(&self) -> Resampling {
        self.resampling
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn to_json(&self) -> serde_json::Value {
        let st = &self.st;
        let out = ViewJson {
            space: SpaceJson {
                left: st.win().left,
                right: st.win().right,
                bottom: st.win().bottom,
                top: st.win().top,
                srs: st.srs().to_string(),
                dx: st.dx(),
                dy: st.dy(),
            },
            time: TimeJson {
                t0: st.t0().to_string(),
                t1: st.t1().to_string(),
                dt: st.dt().to_string(),
            },
            resampling: self.resampling.as_str().to_string(),
            aggregation: self.aggregation.as_str().to_string(),
        };

        serde_json::to_value(out).expect("view serialization is infallible")
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let v: ViewJson = serde_json::from_value(value.clone())?;

        let win = BoundsS::new(v.space.left, v.space.right, v.space.bottom, v.space.top);
        let dt = Duration::from_string(&v.time.dt)?;
        let st = StReference::with_pixel_size(
            win,
            v.space.srs,
            v.space.dx,
            v.space.dy,
            DateTime::from_string(&v.time.t0)?,
            DateTime::from_string(&v.time.t1)?,
            dt,
        )?;

        Ok(Self {
            st,
            resampling: Resampling::from_str(&v.resampling)?,
            aggregation: Aggregation::from_str(&v.aggregation)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnit;

    fn reference() -> StReference {
        StReference::new(
            BoundsS::new(0.0, 10.0, 0.0, 10.0),
            "EPSG:4326",
            10,
            10,
            DateTime::from_string("2018-01-01").unwrap(),
            DateTime::from_string("2018-01-31").unwrap(),
            Duration::new(1, TimeUnit::Day),
        )
        .unwrap()
    }

    #[test]
    fn test_derived_sizes() {
        let st = reference();
        assert_eq!(st.nt(), 31);
        assert_eq!(st.dx(), 1.0);
        assert_eq!(st.dy(), 1.0);
    }

    #[test]
    fn test_with_pixel_size() {
        let st = StReference::with_pixel_size(
            BoundsS::new(0.0, 10.0, 0.0, 10.0),
            "EPSG:4326",
            2.5,
            2.5,
            DateTime::from_string("2018-01-01").unwrap(),
            DateTime::from_string("2018-01-01").unwrap(),
            Duration::new(1, TimeUnit::Day),
        )
        .unwrap();
        assert_eq!(st.nx(), 4);
        assert_eq!(st.ny(), 4);
        assert_eq!(st.nt(), 1);
    }

    #[test]
    fn test_invalid_references() {
        let t = DateTime::from_string("2018-01-01").unwrap();
        let later = DateTime::from_string("2018-02-01").unwrap();
        let day = Duration::new(1, TimeUnit::Day);

        assert!(StReference::new(BoundsS::new(0.0, 0.0, 0.0, 1.0), "x", 1, 1, t, t, day).is_err());
        assert!(StReference::new(BoundsS::new(0.0, 1.0, 0.0, 1.0), "x", 0, 1, t, t, day).is_err());
        assert!(StReference::new(
            BoundsS::new(0.0, 1.0, 0.0, 1.0),
            "x",
            1,
            1,
            t,
            t,
            Duration::new(0, TimeUnit::Day)
        )
        .is_err());
        assert!(StReference::new(BoundsS::new(0.0, 1.0, 0.0, 1.0), "x", 1, 1, later, t, day).is_err());
    }

    #[test]
    fn test_unit_coercion() {
        let st = StReference::new(
            BoundsS::new(0.0, 1.0, 0.0, 1.0),
            "x",
            1,
            1,
            DateTime::from_string("2018-01-04T12:30").unwrap(),
            DateTime::from_string("2018-01-09").unwrap(),
            Duration::new(1, TimeUnit::Day),
        )
        .unwrap();
        assert_eq!(st.t0().to_string(), "2018-01-04");
        assert_eq!(st.t0().unit(), TimeUnit::Day);
        assert_eq!(st.nt(), 6);
    }

    #[test]
    fn test_mixed_resolution_window_is_valid() {
        // t0 written at day resolution, t1 at month resolution; at the
        // monthly dt both land in the same slice
        let st = StReference::new(
            BoundsS::new(0.0, 1.0, 0.0, 1.0),
            "x",
            1,
            1,
            DateTime::from_string("2020-02-01").unwrap(),
            DateTime::from_string("2020-02").unwrap(),
            Duration::new(1, TimeUnit::Month),
        )
        .unwrap();
        assert_eq!(st.t0().to_string(), "2020-02");
        assert_eq!(st.t1().to_string(), "2020-02");
        assert_eq!(st.nt(), 1);
    }

    #[test]
    fn test_collapsed_time() {
        let st = reference().collapsed_time();
        assert_eq!(st.nt(), 1);
        assert_eq!(st.dt(), Duration::new(30, TimeUnit::Day));
        assert_eq!(st.t0(), st.t1());
    }

    #[test]
    fn test_collapsed_space() {
        let st = reference().collapsed_space();
        assert_eq!(st.nx(), 1);
        assert_eq!(st.ny(), 1);
        assert_eq!(st.dx(), 10.0);
        assert_eq!(st.nt(), 31);
    }

    #[test]
    fn test_view_json_roundtrip() {
        let view = CubeView::new(reference(), Resampling::Bilinear, Aggregation::Mean);
        let json = view.to_json();
        let back = CubeView::from_json(&json).unwrap();
        assert_eq!(back, view);
        assert_eq!(back.to_json(), json);
    }
}
