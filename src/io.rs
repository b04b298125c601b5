//! File formats: XYZ-style trajectories, the scalar time series and the
//! JSON run metadata.
//!
//! Trajectory frame layout:
//!
//! ```text
//! {N} {has_velocities}
//!
//! {label} {x} {y} {z} [{vx} {vy} {vz}]   (N lines)
//! ```
//!
//! The second line is an empty comment line; readers skip blank lines.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};
use rand::Rng;
use serde::{Deserialize, Serialize};
use ultraviolet::DVec3;

use crate::ensemble::Ensemble;
use crate::error::{Error, Result};
use crate::profile_scope;
use crate::simulation::Observables;
use crate::species::Element;

/// What goes into each written frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub velocities: bool,
    /// Write `r + i * L` instead of the folded positions.
    pub unfold: bool,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            velocities: true,
            unfold: false,
        }
    }
}

/// Append one frame of `ensemble` to `w`.
pub fn write_frame<W: Write>(w: &mut W, ensemble: &Ensemble, format: FrameFormat) -> Result<()> {
    let positions = if format.unfold {
        ensemble.unfolded_positions()
    } else {
        ensemble.positions.clone()
    };
    let label = &ensemble.element.name;
    writeln!(w, "{} {}", ensemble.n(), u8::from(format.velocities))?;
    writeln!(w)?;
    for (r, v) in positions.iter().zip(&ensemble.velocities) {
        if format.velocities {
            writeln!(
                w,
                "{label} {:.8} {:.8} {:.8} {:.8} {:.8} {:.8}",
                r.x, r.y, r.z, v.x, v.y, v.z
            )?;
        } else {
            writeln!(w, "{label} {:.8} {:.8} {:.8}", r.x, r.y, r.z)?;
        }
    }
    Ok(())
}

/// Write one frame to `path`, truncating it or appending to an existing stream.
pub fn write_xyz_file<P: AsRef<Path>>(
    path: P,
    ensemble: &Ensemble,
    append: bool,
    format: FrameFormat,
) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    let mut w = BufWriter::new(file);
    write_frame(&mut w, ensemble, format)?;
    w.flush()?;
    Ok(())
}

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn create(path: &Path, compress: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let w = BufWriter::new(File::create(path)?);
        Ok(if compress {
            Sink::Gzip(GzEncoder::new(w, Compression::default()))
        } else {
            Sink::Plain(w)
        })
    }

    fn finish(self) -> Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush()?,
            Sink::Gzip(e) => e.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
        }
    }
}

/// Output settings of a trajectory writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryOptions {
    /// Path prefix; files are named `{prefix}_{step}.xyz[.gz]`.
    pub prefix: PathBuf,
    /// All frames in `{prefix}_0.xyz` instead of one file per sampled step.
    pub single_file: bool,
    pub format: FrameFormat,
    pub compress: bool,
}

/// Writes sampled frames either into one stream or one file per step.
pub struct TrajectoryWriter {
    options: TrajectoryOptions,
    single: Option<Sink>,
    written: Vec<PathBuf>,
}

impl TrajectoryWriter {
    pub fn new(options: TrajectoryOptions) -> Self {
        Self {
            options,
            single: None,
            written: Vec::new(),
        }
    }

    pub fn options(&self) -> &TrajectoryOptions {
        &self.options
    }

    /// Path of the file holding the frame of `step`.
    pub fn frame_path(&self, step: usize) -> PathBuf {
        let step = if self.options.single_file { 0 } else { step };
        let ext = if self.options.compress { "xyz.gz" } else { "xyz" };
        let mut name = OsString::from(self.options.prefix.as_os_str());
        name.push(format!("_{step}.{ext}"));
        PathBuf::from(name)
    }

    pub fn write(&mut self, ensemble: &Ensemble, step: usize) -> Result<()> {
        profile_scope!("write_frame");
        let format = self.options.format;
        if self.options.single_file {
            if self.single.is_none() {
                let path = self.frame_path(0);
                self.single = Some(Sink::create(&path, self.options.compress)?);
                self.written.push(path);
            }
            if let Some(sink) = self.single.as_mut() {
                write_frame(sink, ensemble, format)?;
            }
        } else {
            let path = self.frame_path(step);
            let mut sink = Sink::create(&path, self.options.compress)?;
            write_frame(&mut sink, ensemble, format)?;
            sink.finish()?;
            self.written.push(path);
        }
        Ok(())
    }

    /// Flush buffered output; a compressed single stream is flushed but stays open.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(sink) = self.single.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    /// Close the stream and return every file written.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        if let Some(sink) = self.single.take() {
            sink.finish()?;
        }
        Ok(std::mem::take(&mut self.written))
    }
}

/// One parsed trajectory frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub labels: Vec<String>,
    pub positions: Vec<DVec3>,
    pub velocities: Option<Vec<DVec3>>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Upper bound on the per-frame buffer reservation taken from a header.
const MAX_FRAME_RESERVE: usize = 1 << 16;

/// Line reader that skips blank lines and tracks 1-based line numbers.
struct Lines<R> {
    inner: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> Lines<R> {
    fn next_nonblank(&mut self) -> Result<Option<(usize, String)>> {
        loop {
            self.buf.clear();
            if self.inner.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed = self.buf.trim();
            if !trimmed.is_empty() {
                return Ok(Some((self.line, trimmed.to_string())));
            }
        }
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, line: usize, what: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| Error::malformed(line, format!("invalid {what} '{field}'")))
}

fn read_frame_from<R: BufRead>(lines: &mut Lines<R>) -> Result<Option<Frame>> {
    let Some((line, header)) = lines.next_nonblank()? else {
        return Ok(None);
    };
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(Error::malformed(
            line,
            format!("expected header '{{N}} {{has_velocity}}', got '{header}'"),
        ));
    }
    let n: usize = parse_field(fields[0], line, "particle count")?;
    let has_velocities = match fields[1] {
        "0" => false,
        "1" => true,
        other => {
            return Err(Error::malformed(
                line,
                format!("velocity flag must be 0 or 1, got '{other}'"),
            ))
        }
    };
    let columns = if has_velocities { 7 } else { 4 };

    // the header count is untrusted; buffers grow as lines arrive
    let reserve = n.min(MAX_FRAME_RESERVE);
    let mut labels = Vec::with_capacity(reserve);
    let mut positions = Vec::with_capacity(reserve);
    let mut velocities = Vec::with_capacity(if has_velocities { reserve } else { 0 });
    for k in 0..n {
        let Some((line, text)) = lines.next_nonblank()? else {
            return Err(Error::malformed(
                lines.line,
                format!("frame ended after {k} of {n} particles"),
            ));
        };
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != columns {
            return Err(Error::malformed(
                line,
                format!("expected {columns} columns, got {}", fields.len()),
            ));
        }
        let mut values = [0.0f64; 6];
        for (slot, field) in values.iter_mut().zip(&fields[1..]) {
            *slot = parse_field(field, line, "coordinate")?;
        }
        labels.push(fields[0].to_string());
        positions.push(DVec3::new(values[0], values[1], values[2]));
        if has_velocities {
            velocities.push(DVec3::new(values[3], values[4], values[5]));
        }
    }
    Ok(Some(Frame {
        labels,
        positions,
        velocities: has_velocities.then_some(velocities),
    }))
}

/// Parse every frame in `reader`.
pub fn read_frames<R: BufRead>(reader: R) -> Result<Vec<Frame>> {
    let mut lines = Lines {
        inner: reader,
        line: 0,
        buf: String::new(),
    };
    let mut frames = Vec::new();
    while let Some(frame) = read_frame_from(&mut lines)? {
        frames.push(frame);
    }
    Ok(frames)
}

/// Open a trajectory file, transparently decompressing `.gz`.
pub fn open_trajectory<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let gz = path.extension().is_some_and(|e| e == "gz");
    Ok(if gz {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

pub fn read_frames_file<P: AsRef<Path>>(path: P) -> Result<Vec<Frame>> {
    read_frames(open_trajectory(path)?)
}

/// Build an ensemble from a frame; the species comes from the first label.
pub fn ensemble_from_frame<R: Rng + ?Sized>(
    frame: Frame,
    rho: f64,
    remove_drift: bool,
    rng: &mut R,
) -> Result<Ensemble> {
    let Some(first) = frame.labels.first() else {
        return Err(Error::InvalidParameter("trajectory frame has no particles".into()));
    };
    if let Some(other) = frame.labels.iter().find(|l| *l != first) {
        return Err(Error::InvalidParameter(format!(
            "single-species ensemble expected, found '{first}' and '{other}'"
        )));
    }
    let element = Element::lookup(first)?;
    Ensemble::from_parts(
        rho,
        element,
        frame.positions,
        frame.velocities,
        remove_drift,
        rng,
    )
}

/// Ensemble from the first frame of a trajectory file.
pub fn ensemble_from_file<P: AsRef<Path>, R: Rng + ?Sized>(
    path: P,
    rho: f64,
    remove_drift: bool,
    rng: &mut R,
) -> Result<Ensemble> {
    let path = path.as_ref();
    let frame = read_frames_file(path)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::malformed(0, format!("{} holds no frames", path.display())))?;
    ensemble_from_frame(frame, rho, remove_drift, rng)
}

/// One ensemble per frame of a trajectory file.
pub fn ensembles_from_file<P: AsRef<Path>, R: Rng + ?Sized>(
    path: P,
    rho: f64,
    remove_drift: bool,
    rng: &mut R,
) -> Result<Vec<Ensemble>> {
    read_frames_file(path)?
        .into_iter()
        .map(|f| ensemble_from_frame(f, rho, remove_drift, &mut *rng))
        .collect()
}

/// Tab-separated `time KE PE TE drift T P` rows with a header line.
pub fn write_series<W: Write>(w: &mut W, series: &[Observables]) -> Result<()> {
    writeln!(w, "{}", Observables::COLUMNS.join("\t"))?;
    for obs in series {
        let row: Vec<String> = obs.row().iter().map(|v| format!("{v:.6e}")).collect();
        writeln!(w, "{}", row.join("\t"))?;
    }
    Ok(())
}

pub fn write_series_file<P: AsRef<Path>>(path: P, series: &[Observables]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_series(&mut w, series)?;
    w.flush()?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThermostatMetadata {
    pub bath_temperature: f64,
    pub collision_frequency: f64,
}

/// Parameters needed to rebuild an equivalent state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub element: String,
    pub particles: usize,
    pub density: f64,
    pub initial_temperature: f64,
    pub cutoff: f64,
    pub tail_corrections: bool,
    pub statistics: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermostat: Option<ThermostatMetadata>,
}

pub fn save_metadata<P: AsRef<Path>>(path: P, meta: &RunMetadata) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, meta)?;
    writeln!(w)?;
    w.flush()?;
    Ok(())
}

pub fn load_metadata<P: AsRef<Path>>(path: P) -> Result<RunMetadata> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
