//! Forwarding chunks through an external process.
//!
//! Each chunk is serialized to a binary message, handed to a child process,
//! and replaced by the message the child writes back. All integers and
//! doubles are little-endian:
//!
//! ```text
//! message := size_btyx (4 x i32)
//!            per band: name length (i32) + UTF-8 bytes
//!            dimension labels: nt doubles (slice-start epoch seconds),
//!                              ny doubles (cell-center y, top to bottom),
//!                              nx doubles (cell-center x, left to right)
//!            nb*nt*ny*nx doubles, (b, t, y, x) row-major
//! ```
//!
//! The child either talks over stdin/stdout (one process per chunk) or, in
//! file-streaming mode, reads and writes the files named by the
//! `RASTERCUBE_STREAM_IN` / `RASTERCUBE_STREAM_OUT` environment variables.
//! The number of output bands is discovered once at construction by probing
//! the command with a minimal all-NaN chunk.

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use ndarray::Array4;
use serde_json::{json, Value};
use tracing::debug;

use crate::band::{Band, BandCollection};
use crate::chunk::{ChunkData, ChunkId};
use crate::cube::{link_child, Cube, CubeBase};
use crate::errors::{Error, Result};
use crate::helpers::unique_name;
use crate::reference::StReference;

fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn read_i32(stream: &mut impl Read) -> Result<i32> {
    let mut buf = [0; 4];
    stream.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f64(stream: &mut impl Read) -> Result<f64> {
    let mut buf = [0; 8];
    stream.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn encode_message(
    buf: &ndarray::ArrayView4<f64>,
    band_names: &[String],
    t_labels: &[f64],
    y_labels: &[f64],
    x_labels: &[f64],
) -> Vec<u8> {
    let (nb, nt, ny, nx) = buf.dim();
    let mut out = Vec::with_capacity(4 * 4 + 8 * nb * nt * ny * nx);

    write_i32(&mut out, nb as i32);
    write_i32(&mut out, nt as i32);
    write_i32(&mut out, ny as i32);
    write_i32(&mut out, nx as i32);
    for name in band_names {
        write_i32(&mut out, name.len() as i32);
        out.extend_from_slice(name.as_bytes());
    }
    for labels in [t_labels, y_labels, x_labels] {
        for &label in labels {
            write_f64(&mut out, label);
        }
    }
    for &v in buf.iter() {
        write_f64(&mut out, v);
    }

    out
}

fn decode_message(bytes: &[u8]) -> Result<Array4<f64>> {
    let mut stream = bytes;

    let mut size = [0usize; 4];
    for s in size.iter_mut() {
        let v = read_i32(&mut stream)?;
        if v < 0 {
            return Err(Error::Stream(format!("negative dimension {v} in reply")));
        }
        *s = v as usize;
    }
    for _ in 0..size[0] {
        let len = read_i32(&mut stream)?;
        if len < 0 {
            return Err(Error::Stream("negative band name length in reply".to_string()));
        }
        let mut name = vec![0; len as usize];
        stream.read_exact(&mut name)?;
    }
    for _ in 0..size[1] + size[2] + size[3] {
        read_f64(&mut stream)?;
    }

    let mut values = Vec::with_capacity(size.iter().product());
    for _ in 0..size.iter().product::<usize>() {
        values.push(read_f64(&mut stream)?);
    }

    Array4::from_shape_vec(size, values)
        .map_err(|e| Error::Stream(format!("reply shape mismatch: {e}")))
}

/// Replaces each chunk with the output of an external command.
///
pub struct StreamCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    bands: BandCollection,
    command: String,
    argv: Vec<String>,
    file_streaming: bool,
}

impl StreamCube {
    pub fn create(
        in_cube: Arc<dyn Cube>,
        command: &str,
        file_streaming: bool,
    ) -> Result<Arc<Self>> {
        let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            return Err(Error::Config("stream command must not be empty".to_string()));
        }

        // One-time probe with a minimal all-NaN chunk to learn how many
        // bands the command produces.
        let st = in_cube.st_reference();
        let nb_in = in_cube.size_bands();
        let probe = Array4::from_elem([nb_in, 1, 1, 1], f64::NAN);
        let message = encode_message(
            &probe.view(),
            &in_cube.bands().names(),
            &[st.t0().epoch_seconds() as f64],
            &[st.win().top - st.dy() / 2.0],
            &[st.win().left + st.dx() / 2.0],
        );
        let reply = run_command(&argv, file_streaming, message)?;
        let nb_out = decode_message(&reply)?.dim().0;
        if nb_out == 0 {
            return Err(Error::Stream(
                "stream command produced a chunk without bands".to_string(),
            ));
        }

        let mut bands = BandCollection::new();
        if nb_out == nb_in {
            for band in in_cube.bands().iter() {
                bands.add(band.clone())?;
            }
        } else {
            for i in 1..=nb_out {
                bands.add(Band::new(format!("band{i}")))?;
            }
        }

        let out = Arc::new(Self {
            base: CubeBase::new(),
            bands,
            command: command.to_string(),
            argv,
            file_streaming,
            in_cube,
        });
        link_child(&out.in_cube, &(Arc::clone(&out) as Arc<dyn Cube>));

        Ok(out)
    }
}

fn run_command(argv: &[String], file_streaming: bool, input: Vec<u8>) -> Result<Vec<u8>> {
    if file_streaming {
        run_file_streaming(argv, input)
    } else {
        run_piped(argv, input)
    }
}

fn run_piped(argv: &[String], input: Vec<u8>) -> Result<Vec<u8>> {
    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Stream(format!("cannot spawn '{}': {e}", argv[0])))?;

    // Feed stdin from a separate thread; the child may interleave reading
    // and writing and both pipes have bounded buffers.
    let mut stdin = child.stdin.take().expect("stdin was piped");
    let writer = thread::spawn(move || {
        let _ = stdin.write_all(&input);
    });

    let output = child
        .wait_with_output()
        .map_err(|e| Error::Stream(format!("cannot read from '{}': {e}", argv[0])))?;
    let _ = writer.join();

    if !output.status.success() {
        return Err(Error::Stream(format!(
            "'{}' exited with {}: {}",
            argv[0],
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output.stdout)
}

fn run_file_streaming(argv: &[String], input: Vec<u8>) -> Result<Vec<u8>> {
    let dir = env::temp_dir();
    let in_path = dir.join(unique_name(12, "stream_", ".in"));
    let out_path = dir.join(unique_name(12, "stream_", ".out"));
    fs::write(&in_path, input)?;

    let result = (|| {
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .env("RASTERCUBE_STREAM_IN", &in_path)
            .env("RASTERCUBE_STREAM_OUT", &out_path)
            .stderr(Stdio::piped())
            .stdout(Stdio::null())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Stream(format!("cannot spawn '{}': {e}", argv[0])))?;

        if !output.status.success() {
            return Err(Error::Stream(format!(
                "'{}' exited with {}: {}",
                argv[0],
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(fs::read(&out_path)?)
    })();

    let _ = fs::remove_file(&in_path);
    let _ = fs::remove_file(&out_path);

    result
}

impl Cube for StreamCube {
    fn base(&self) -> &CubeBase {
        &self.base
    }

    fn st_reference(&self) -> &StReference {
        self.in_cube.st_reference()
    }

    fn bands(&self) -> &BandCollection {
        &self.bands
    }

    fn chunk_size(&self) -> [usize; 3] {
        self.in_cube.chunk_size()
    }

    fn read_chunk(&self, id: ChunkId) -> Result<ChunkData> {
        debug!(id, "stream_cube read_chunk");
        if id as usize >= self.count_chunks() {
            return Ok(ChunkData::empty([0, 0, 0, 0]));
        }

        let mut in_chunk = self.in_cube.read_chunk(id)?;
        let in_buf = in_chunk.materialize();
        let (_, st_size, sy, sx) = in_buf.dim();

        let st = self.st_reference();
        let bounds = self.bounds_from_chunk(id);
        let t_labels: Vec<f64> = (0..st_size)
            .map(|i| (bounds.t.t0 + st.dt().scaled(i as i64)).epoch_seconds() as f64)
            .collect();
        let y_labels: Vec<f64> = (0..sy)
            .map(|i| bounds.s.top - (i as f64 + 0.5) * st.dy())
            .collect();
        let x_labels: Vec<f64> = (0..sx)
            .map(|i| bounds.s.left + (i as f64 + 0.5) * st.dx())
            .collect();

        let message = encode_message(
            &in_buf.view(),
            &self.in_cube.bands().names(),
            &t_labels,
            &y_labels,
            &x_labels,
        );
        let reply = run_command(&self.argv, self.file_streaming, message)?;
        let buf = decode_message(&reply)?;

        let (nb, nt, ny, nx) = buf.dim();
        if nb != self.bands.count() || nt != st_size || ny != sy || nx != sx {
            return Err(Error::Stream(format!(
                "'{}' replied with shape ({nb}, {nt}, {ny}, {nx}), expected ({}, {st_size}, {sy}, {sx})",
                self.command,
                self.bands.count(),
            )));
        }

        Ok(ChunkData::from_array(buf))
    }

    fn to_json(&self) -> Result<Value> {
        Ok(json!({
            "cube_type": "stream",
            "command": self.command.clone(),
            "file_streaming": self.file_streaming,
            "in_cube": self.in_cube.to_json()?,
        }))
    }
}
