use ndarray::Array4;

/// Identifies one chunk of a cube; row-major over (t, y, x) with t outermost.
pub type ChunkId = u32;

/// A dense block of cube data, shape `(bands, time, y, x)`, `f64` values with
/// `NaN` meaning "no data".
///
/// A chunk may be *empty*: it keeps its logical shape but holds no buffer,
/// which signals "all values missing" without allocating. Consumers that
/// need actual storage call [`ChunkData::materialize`].
///
#[derive(Clone, Debug)]
pub struct ChunkData {
    size: [usize; 4],
    buf: Option<Array4<f64>>,
}

impl ChunkData {
    /// An empty chunk with the given logical shape.
    pub fn empty(size: [usize; 4]) -> Self {
        Self { size, buf: None }
    }

    /// A chunk with every value set to `fill`.
    pub fn filled(size: [usize; 4], fill: f64) -> Self {
        Self {
            size,
            buf: Some(Array4::from_elem(size, fill)),
        }
    }

    pub fn from_array(buf: Array4<f64>) -> Self {
        let d = buf.dim();
        Self {
            size: [d.0, d.1, d.2, d.3],
            buf: Some(buf),
        }
    }

    /// Logical shape `(nb, nt, ny, nx)`, present even when the buffer is not.
    pub fn size(&self) -> [usize; 4] {
        self.size
    }

    pub fn total_values(&self) -> usize {
        self.size.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_none() || self.total_values() == 0
    }

    pub fn buf(&self) -> Option<&Array4<f64>> {
        self.buf.as_ref()
    }

    pub fn buf_mut(&mut self) -> Option<&mut Array4<f64>> {
        self.buf.as_mut()
    }

    /// The backing buffer, allocating an all-NaN one first if the chunk was
    /// empty.
    pub fn materialize(&mut self) -> &mut Array4<f64> {
        if self.buf.is_none() {
            self.buf = Some(Array4::from_elem(self.size, f64::NAN));
        }
        self.buf.as_mut().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_keeps_shape() {
        let chunk = ChunkData::empty([2, 3, 4, 5]);
        assert!(chunk.is_empty());
        assert_eq!(chunk.size(), [2, 3, 4, 5]);
        assert_eq!(chunk.total_values(), 120);
        assert!(chunk.buf().is_none());
    }

    #[test]
    fn test_materialize_fills_nan() {
        let mut chunk = ChunkData::empty([1, 1, 2, 2]);
        let buf = chunk.materialize();
        assert!(buf.iter().all(|v| v.is_nan()));
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_filled() {
        let chunk = ChunkData::filled([1, 2, 2, 2], 5.0);
        assert!(chunk.buf().unwrap().iter().all(|v| *v == 5.0));
    }
}
