use crate::errors::{Error, Result};

/// Metadata for one band of a cube or a collection.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Band {
    pub name: String,

    /// Storage type of the source data, eg "int16" or "float64". Cube
    /// buffers are always f64 regardless.
    pub type_name: String,

    pub offset: f64,
    pub scale: f64,
    pub unit: String,
    pub no_data: Option<f64>,
}

impl Band {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            type_name: "float64".to_string(),
            offset: 0.0,
            scale: 1.0,
            unit: String::new(),
            no_data: None,
        }
    }
}

/// An ordered set of bands with unique names.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BandCollection {
    bands: Vec<Band>,
}

impl BandCollection {
    pub fn new() -> Self {
        Self { bands: vec![] }
    }

    pub fn add(&mut self, band: Band) -> Result<()> {
        if self.has(&band.name) {
            return Err(Error::Config(format!(
                "band '{}' already exists in collection",
                band.name
            )));
        }
        self.bands.push(band);

        Ok(())
    }

    pub fn count(&self) -> usize {
        self.bands.len()
    }

    pub fn get(&self, index: usize) -> &Band {
        &self.bands[index]
    }

    pub fn has(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    /// Zero-based index of a band by name.
    pub fn get_index(&self, name: &str) -> Result<usize> {
        self.bands
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| Error::BadName(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Band> {
        self.bands.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }
}
