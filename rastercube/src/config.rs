/// Engine-level knobs for the geospatial backend.
///
/// The backend library keeps process-wide caches; this context caps them and
/// bounds the warp thread pool. It is passed explicitly to whichever
/// `RasterBackend` implementation is wired in, so the engine core itself
/// carries no hidden global state.
///
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Upper bound, in bytes, for the backend's raster block cache.
    pub raster_cache_bytes: Option<u64>,

    /// Number of threads the backend may use for a single warp.
    pub warp_threads: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raster_cache_bytes: Some(256 * 1024 * 1024),
            warp_threads: Some(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let config = Config::default();
        assert!(config.raster_cache_bytes.unwrap() > 0);
        assert_eq!(config.warp_threads, Some(1));
    }
}
