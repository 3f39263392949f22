//! Reconstructing cube pipelines from their self-describing JSON graphs.
//!
//! Every cube serializes to `{ "cube_type": <tag>, ...params, "in_cube": ... }`
//! (binary cubes use `A` and `B`); the factory holds the inverse: a registry
//! from tag to constructor, applied recursively. The factory is an explicit
//! object rather than process-wide state; it carries the raster backend and
//! a collection opener so `image_collection` leaves can be rebuilt.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::collection::ImageCollection;
use crate::collection_cube::{ImageCollectionCube, ImageMask};
use crate::cube::Cube;
use crate::errors::{Error, Result};
use crate::ops::apply_pixel::ApplyPixelCube;
use crate::ops::dummy::DummyCube;
use crate::ops::filter_pixel::FilterPixelCube;
use crate::ops::join_bands::JoinBandsCube;
use crate::ops::reduce::{parse_reducer_bands, Reducer};
use crate::ops::reduce_space::ReduceSpaceCube;
use crate::ops::reduce_time::ReduceTimeCube;
use crate::ops::select_bands::SelectBandsCube;
use crate::ops::stream::StreamCube;
use crate::ops::window_time::WindowTimeCube;
use crate::reference::CubeView;
use crate::warp::RasterBackend;

type Generator = Box<dyn Fn(&Value, &CubeFactory) -> Result<Arc<dyn Cube>> + Send + Sync>;
type CollectionOpener = Box<dyn Fn(&str) -> Result<Arc<dyn ImageCollection>> + Send + Sync>;

fn str_field<'a>(j: &'a Value, key: &str) -> Result<&'a str> {
    j.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Config(format!("missing or invalid '{key}' key")))
}

fn bool_field(j: &Value, key: &str) -> Result<bool> {
    j.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| Error::Config(format!("missing or invalid '{key}' key")))
}

fn usize_field(j: &Value, key: &str) -> Result<usize> {
    j.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| Error::Config(format!("missing or invalid '{key}' key")))
}

fn f64_field(j: &Value, key: &str) -> Result<f64> {
    j.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::Config(format!("missing or invalid '{key}' key")))
}

fn string_list(j: &Value, key: &str) -> Result<Vec<String>> {
    j.get(key)
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|v| {
                    v.as_str()
                        .map(String::from)
                        .ok_or_else(|| Error::Config(format!("'{key}' must hold strings")))
                })
                .collect()
        })
        .ok_or_else(|| Error::Config(format!("missing or invalid '{key}' key")))?
}

fn chunk_size_field(j: &Value) -> Result<[usize; 3]> {
    let list = j
        .get("chunk_size")
        .and_then(Value::as_array)
        .filter(|l| l.len() == 3)
        .ok_or_else(|| Error::Config("missing or invalid 'chunk_size' key".to_string()))?;
    let mut out = [0; 3];
    for (i, v) in list.iter().enumerate() {
        out[i] = v
            .as_u64()
            .filter(|v| *v > 0)
            .ok_or_else(|| Error::Config("chunk sizes must be positive".to_string()))?
            as usize;
    }

    Ok(out)
}

/// A registry of cube constructors keyed by `cube_type`.
///
pub struct CubeFactory {
    generators: HashMap<String, Generator>,
    backend: Arc<dyn RasterBackend>,
    open_collection: CollectionOpener,
}

impl CubeFactory {
    /// A factory with every built-in cube type registered.
    pub fn new(
        backend: Arc<dyn RasterBackend>,
        open_collection: CollectionOpener,
    ) -> Self {
        let mut factory = Self {
            generators: HashMap::new(),
            backend,
            open_collection,
        };
        factory.register_default();

        factory
    }

    /// Register a custom cube type; replaces any previous registration of
    /// the same tag.
    pub fn register(&mut self, type_name: &str, generator: Generator) {
        self.generators.insert(type_name.to_string(), generator);
    }

    /// Recursively rebuild a cube pipeline from its JSON description.
    pub fn create_from_json(&self, j: &Value) -> Result<Arc<dyn Cube>> {
        let cube_type = j
            .get("cube_type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Config("cube description is missing cube_type".to_string()))?;

        let generator = self
            .generators
            .get(cube_type)
            .ok_or_else(|| Error::Config(format!("unknown cube type '{cube_type}'")))?;

        generator(j, self)
    }

    fn in_cube(&self, j: &Value) -> Result<Arc<dyn Cube>> {
        let inner = j
            .get("in_cube")
            .ok_or_else(|| Error::Config("cube description is missing in_cube".to_string()))?;

        self.create_from_json(inner)
    }

    fn register_default(&mut self) {
        self.register(
            "image_collection",
            Box::new(|j, f| {
                let collection = (f.open_collection)(str_field(j, "file")?)?;
                let view = CubeView::from_json(
                    j.get("view")
                        .ok_or_else(|| Error::Config("missing 'view' key".to_string()))?,
                )?;
                let bands = match j.get("bands") {
                    Some(_) => string_list(j, "bands")?,
                    None => vec![],
                };

                let cube = ImageCollectionCube::create_with_bands(
                    collection,
                    Arc::clone(&f.backend),
                    view,
                    &bands,
                )?;
                cube.set_chunk_size(chunk_size_field(j)?);
                if let Some(mask) = j.get("mask") {
                    cube.set_mask(str_field(j, "mask_band")?, ImageMask::from_json(mask)?);
                }
                if j.get("warp_args").is_some() {
                    cube.set_warp_args(&string_list(j, "warp_args")?);
                }

                Ok(cube as Arc<dyn Cube>)
            }),
        );

        self.register(
            "dummy",
            Box::new(|j, _| {
                let view = CubeView::from_json(
                    j.get("view")
                        .ok_or_else(|| Error::Config("missing 'view' key".to_string()))?,
                )?;
                let cube = DummyCube::create(view, usize_field(j, "nbands")?, f64_field(j, "fill")?)?;
                cube.set_chunk_size(chunk_size_field(j)?);

                Ok(cube as Arc<dyn Cube>)
            }),
        );

        self.register(
            "reduce",
            Box::new(|j, f| {
                let reducer = Reducer::from_str(str_field(j, "reducer")?)?;
                Ok(ReduceTimeCube::create_single(f.in_cube(j)?, reducer)? as Arc<dyn Cube>)
            }),
        );

        self.register(
            "reduce_time",
            Box::new(|j, f| {
                let pairs = parse_reducer_bands(
                    j.get("reducer_bands")
                        .ok_or_else(|| Error::Config("missing 'reducer_bands' key".to_string()))?,
                )?;
                Ok(ReduceTimeCube::create(f.in_cube(j)?, pairs)? as Arc<dyn Cube>)
            }),
        );

        self.register(
            "reduce_space",
            Box::new(|j, f| {
                let pairs = parse_reducer_bands(
                    j.get("reducer_bands")
                        .ok_or_else(|| Error::Config("missing 'reducer_bands' key".to_string()))?,
                )?;
                Ok(ReduceSpaceCube::create(f.in_cube(j)?, pairs)? as Arc<dyn Cube>)
            }),
        );

        self.register(
            "window_time",
            Box::new(|j, f| {
                let win_l = usize_field(j, "win_size_l")?;
                let win_r = usize_field(j, "win_size_r")?;
                let in_cube = f.in_cube(j)?;

                let cube = if let Some(kernel) = j.get("kernel") {
                    let kernel: Vec<f64> = kernel
                        .as_array()
                        .map(|l| l.iter().filter_map(Value::as_f64).collect())
                        .ok_or_else(|| Error::Config("'kernel' must be an array".to_string()))?;
                    WindowTimeCube::create_kernel(in_cube, kernel, win_l, win_r)?
                } else {
                    let pairs = parse_reducer_bands(j.get("reducer_bands").ok_or_else(|| {
                        Error::Config("window_time needs 'kernel' or 'reducer_bands'".to_string())
                    })?)?;
                    WindowTimeCube::create_reduce(in_cube, pairs, win_l, win_r)?
                };

                Ok(cube as Arc<dyn Cube>)
            }),
        );

        self.register(
            "select_bands",
            Box::new(|j, f| {
                let bands = string_list(j, "bands")?;
                Ok(SelectBandsCube::create(f.in_cube(j)?, bands)? as Arc<dyn Cube>)
            }),
        );

        self.register(
            "join_bands",
            Box::new(|j, f| {
                let a = f.create_from_json(
                    j.get("A")
                        .ok_or_else(|| Error::Config("join_bands is missing 'A'".to_string()))?,
                )?;
                let b = f.create_from_json(
                    j.get("B")
                        .ok_or_else(|| Error::Config("join_bands is missing 'B'".to_string()))?,
                )?;
                Ok(JoinBandsCube::create(
                    a,
                    b,
                    str_field(j, "prefix_A")?,
                    str_field(j, "prefix_B")?,
                )? as Arc<dyn Cube>)
            }),
        );

        self.register(
            "apply_pixel",
            Box::new(|j, f| {
                let exprs = string_list(j, "expr")?;
                let band_names = match j.get("band_names") {
                    Some(_) => Some(string_list(j, "band_names")?),
                    None => None,
                };
                Ok(ApplyPixelCube::create(f.in_cube(j)?, exprs, band_names)? as Arc<dyn Cube>)
            }),
        );

        self.register(
            "filter_pixel",
            Box::new(|j, f| {
                Ok(FilterPixelCube::create(f.in_cube(j)?, str_field(j, "predicate")?)?
                    as Arc<dyn Cube>)
            }),
        );

        self.register(
            "stream",
            Box::new(|j, f| {
                Ok(StreamCube::create(
                    f.in_cube(j)?,
                    str_field(j, "command")?,
                    bool_field(j, "file_streaming")?,
                )? as Arc<dyn Cube>)
            }),
        );
    }
}
