//! Shared fixtures for unit tests: view builders, an in-memory image
//! collection, and a synthetic raster backend that "warps" constant planes
//! with analytically known values.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::Array2;

use crate::band::Band;
use crate::collection::{FindRangeStRow, ImageCollection};
use crate::collection_cube::ImageCollectionCube;
use crate::errors::{Error, Result};
use crate::geom::{BoundsS, BoundsSt};
use crate::reference::{Aggregation, CubeView, Resampling, StReference};
use crate::time::{DateTime, Duration, TimeUnit};
use crate::warp::{RasterBackend, SourceRaster, WarpArgs};

/// A daily view over an `nx` by `ny` unit-pixel grid starting 2020-01-01.
pub(crate) fn view(nx: usize, ny: usize, nt: usize) -> CubeView {
    view_with(nx, ny, nt, Resampling::Near, Aggregation::None)
}

pub(crate) fn view_with(
    nx: usize,
    ny: usize,
    nt: usize,
    resampling: Resampling,
    aggregation: Aggregation,
) -> CubeView {
    let t0 = DateTime::from_string("2020-01-01").unwrap();
    let t1 = t0 + Duration::new(nt as i64 - 1, TimeUnit::Day);
    let st = StReference::new(
        BoundsS::new(0.0, nx as f64, 0.0, ny as f64),
        "EPSG:4326",
        nx,
        ny,
        t0,
        t1,
        Duration::new(1, TimeUnit::Day),
    )
    .unwrap();

    CubeView::new(st, resampling, aggregation)
}

/// One synthetic source raster: full spatial coverage, one constant value
/// per band.
#[derive(Clone, Debug)]
pub(crate) struct TestImage {
    pub descriptor: String,
    pub datetime: String,
    pub values: Vec<f64>,
    pub broken: bool,
}

impl TestImage {
    pub fn new(descriptor: &str, datetime: &str, values: &[f64]) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            datetime: datetime.to_string(),
            values: values.to_vec(),
            broken: false,
        }
    }

    /// Mark the image as unopenable to exercise failure paths.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

/// An in-memory image collection with bands `band1..bandN`.
#[derive(Clone, Debug)]
pub(crate) struct TestCollection {
    nbands: usize,
    images: Vec<TestImage>,
    temporary: bool,
}

impl TestCollection {
    pub fn new(nbands: usize) -> Self {
        Self {
            nbands,
            images: vec![],
            temporary: false,
        }
    }

    pub fn with_image(mut self, image: TestImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }
}

impl ImageCollection for TestCollection {
    fn get_bands(&self) -> Result<Vec<Band>> {
        Ok((1..=self.nbands)
            .map(|i| Band::new(format!("band{i}")))
            .collect())
    }

    fn find_range_st(&self, extent: &BoundsSt) -> Result<Vec<FindRangeStRow>> {
        let unit = extent.t.t0.unit();
        let mut rows = vec![];
        for image in &self.images {
            let at = DateTime::from_string(&image.datetime)?.truncated(unit);
            if at < extent.t.t0 || at > extent.t.t1 {
                continue;
            }
            for num in 1..=self.nbands {
                rows.push(FindRangeStRow {
                    descriptor: image.descriptor.clone(),
                    datetime: image.datetime.clone(),
                    band_name: format!("band{num}"),
                    band_num: num as u16,
                });
            }
        }

        Ok(rows)
    }

    fn is_temporary(&self) -> bool {
        self.temporary
    }

    fn filename(&self) -> String {
        "test-collection.db".to_string()
    }
}

/// A raster backend that serves the constant planes of a `TestCollection`.
pub(crate) struct TestBackend {
    images: HashMap<String, TestImage>,
}

impl TestBackend {
    pub fn new(collection: &TestCollection) -> Self {
        let images = collection
            .images
            .iter()
            .map(|img| (img.descriptor.clone(), img.clone()))
            .collect();
        Self { images }
    }
}

impl RasterBackend for TestBackend {
    fn open(&self, descriptor: &str) -> Result<Box<dyn SourceRaster + '_>> {
        let image = self
            .images
            .get(descriptor)
            .ok_or_else(|| Error::Gdal(format!("no such dataset: {descriptor}")))?;
        if image.broken {
            return Err(Error::Gdal(format!("refusing to open {descriptor}")));
        }

        Ok(Box::new(TestRaster { image }))
    }
}

struct TestRaster<'a> {
    image: &'a TestImage,
}

impl SourceRaster for TestRaster<'_> {
    fn warp(&self, args: &WarpArgs, band_nums: &[u16]) -> Result<Vec<Array2<f64>>> {
        let (nx, ny) = args.ts;
        band_nums
            .iter()
            .map(|num| {
                let value = self
                    .image
                    .values
                    .get(*num as usize - 1)
                    .copied()
                    .ok_or_else(|| Error::Gdal(format!("band {num} out of range")))?;
                Ok(Array2::from_elem((ny, nx), value))
            })
            .collect()
    }
}

/// An image collection cube over a test collection, chunked as one chunk
/// covering the whole cube.
pub(crate) fn collection_cube(
    collection: TestCollection,
    nx: usize,
    ny: usize,
    nt: usize,
    aggregation: Aggregation,
) -> Arc<ImageCollectionCube> {
    collection_cube_with_bands(collection, nx, ny, nt, aggregation, &[])
}

pub(crate) fn collection_cube_with_bands(
    collection: TestCollection,
    nx: usize,
    ny: usize,
    nt: usize,
    aggregation: Aggregation,
    band_names: &[String],
) -> Arc<ImageCollectionCube> {
    let backend = Arc::new(TestBackend::new(&collection));
    let view = view_with(nx, ny, nt, Resampling::Near, aggregation);
    let cube =
        ImageCollectionCube::create_with_bands(Arc::new(collection), backend, view, band_names)
            .unwrap();
    cube.set_chunk_size([nt, ny, nx]);

    cube
}
