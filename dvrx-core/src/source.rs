//! Sample sources: files, network PCM and retune plumbing.
//!
//! Everything upstream of the slicer implements [`SampleSource`]: a
//! blocking reader of int16 samples at a known rate that can be retuned.
//! Transport trouble surfaces as the recoverable `SourceError::Stalled`,
//! which the trunking machine answers with a CC fallback; only teardown
//! returns `Ok(0)`.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::time::{Duration, Instant};

use rubato::{FastFixedIn, Resampler};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::errors::SourceError;

/// Retunes inside this window coalesce into one hardware command.
pub const TUNE_COALESCE: Duration = Duration::from_millis(50);

/// Blocking int16 sample source.
pub trait SampleSource: Send {
    /// Fill `out`; returns the sample count. `Ok(0)` only on teardown.
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError>;

    /// Retune. Fire-and-forget at the protocol level; transport errors
    /// surface as `TuneFailed`.
    fn tune(&mut self, freq_hz: u32) -> Result<(), SourceError>;

    fn set_mod_bandwidth(&mut self, _khz: u16) {}

    /// Mean power of the most recent read, in dBFS.
    fn return_power(&self) -> f32;

    fn sample_rate(&self) -> u32;
}

impl SampleSource for Box<dyn SampleSource> {
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError> {
        (**self).read(out)
    }

    fn tune(&mut self, freq_hz: u32) -> Result<(), SourceError> {
        (**self).tune(freq_hz)
    }

    fn set_mod_bandwidth(&mut self, khz: u16) {
        (**self).set_mod_bandwidth(khz)
    }

    fn return_power(&self) -> f32 {
        (**self).return_power()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }
}

fn power_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return -120.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        return -120.0;
    }
    (20.0 * (rms / 32768.0).log10()) as f32
}

// ---------------------------------------------------------------------------
// Audio file source (WAV and friends via symphonia)
// ---------------------------------------------------------------------------

/// Replays an audio file as a sample stream, resampled to the target rate.
pub struct FileSource {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    last_power: f32,
}

impl FileSource {
    pub fn open(path: &Path, target_rate: u32) -> Result<Self, SourceError> {
        let fail = |reason: String| SourceError::OpenFailed {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| fail(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| fail(format!("probe failed: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| fail("no audio track".into()))?;
        let track_id = track.id;
        let source_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| fail("unknown sample rate".into()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| fail(format!("decoder: {}", e)))?;

        let mut mono = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(_) => break,
            };
            if packet.track_id() != track_id {
                continue;
            }
            if let Ok(decoded) = decoder.decode(&packet) {
                mono.extend(convert_to_mono_f32(&decoded));
            }
        }
        if mono.is_empty() {
            return Err(fail("no samples decoded".into()));
        }

        let resampled = if source_rate != target_rate {
            resample(&mono, source_rate, target_rate)
                .map_err(|e| fail(format!("resample: {}", e)))?
        } else {
            mono
        };

        let samples = resampled
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        Ok(Self {
            samples,
            position: 0,
            sample_rate: target_rate,
            last_power: -120.0,
        })
    }
}

impl SampleSource for FileSource {
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError> {
        let remaining = self.samples.len() - self.position;
        let count = remaining.min(out.len());
        out[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        self.last_power = power_dbfs(&out[..count]);
        Ok(count)
    }

    fn tune(&mut self, _freq_hz: u32) -> Result<(), SourceError> {
        // File replay has nothing to tune.
        Ok(())
    }

    fn return_power(&self) -> f32 {
        self.last_power
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn convert_to_mono_f32(buffer: &AudioBufferRef) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            if channels == 1 {
                buf.chan(0).to_vec()
            } else {
                (0..frames)
                    .map(|i| {
                        (0..channels).map(|ch| buf.chan(ch)[i]).sum::<f32>() / channels as f32
                    })
                    .collect()
            }
        }
        AudioBufferRef::S16(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            (0..frames)
                .map(|i| {
                    (0..channels)
                        .map(|ch| buf.chan(ch)[i] as f32 / 32768.0)
                        .sum::<f32>()
                        / channels as f32
                })
                .collect()
        }
        AudioBufferRef::S32(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            (0..frames)
                .map(|i| {
                    (0..channels)
                        .map(|ch| buf.chan(ch)[i] as f32 / 2_147_483_648.0)
                        .sum::<f32>()
                        / channels as f32
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, String> {
    let chunk_size = 1024;
    let mut resampler = FastFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        1.0,
        rubato::PolynomialDegree::Linear,
        chunk_size,
        1,
    )
    .map_err(|e| e.to_string())?;

    let mut output = Vec::new();
    let mut input_buf = vec![Vec::new(); 1];
    for chunk in samples.chunks(chunk_size) {
        input_buf[0].clear();
        input_buf[0].extend_from_slice(chunk);
        if input_buf[0].len() < chunk_size {
            input_buf[0].resize(chunk_size, 0.0);
        }
        let out = resampler
            .process(&input_buf, None)
            .map_err(|e| e.to_string())?;
        output.extend_from_slice(&out[0]);
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// Raw dibit capture replay
// ---------------------------------------------------------------------------

/// Replays a raw dibit capture: one byte per dibit (values 0/1/3), with
/// the file possibly still growing behind a live recorder.
pub struct DibitFileSource {
    reader: BufReader<File>,
    position: u64,
    /// How long to wait for the file to grow before declaring a stall.
    stall_timeout: Duration,
}

impl DibitFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::OpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            stall_timeout: Duration::from_secs(5),
        })
    }

    pub fn set_stall_timeout(&mut self, timeout: Duration) {
        self.stall_timeout = timeout;
    }

    /// Read dibits. Waits briefly at EOF for a live appender; a quiet file
    /// past the stall timeout is reported as `Stalled`.
    pub fn read_dibits(&mut self, out: &mut [u8]) -> Result<usize, SourceError> {
        let deadline = Instant::now() + self.stall_timeout;
        loop {
            let n = self
                .reader
                .read(out)
                .map_err(|_| SourceError::Closed)?;
            if n > 0 {
                self.position += n as u64;
                for d in out[..n].iter_mut() {
                    *d &= 0x3;
                }
                return Ok(n);
            }
            if Instant::now() >= deadline {
                return Err(SourceError::Stalled {
                    timeout_secs: self.stall_timeout.as_secs_f64(),
                });
            }
            // Rewind the EOF marker and poll for appended data.
            std::thread::sleep(Duration::from_millis(20));
            self.reader
                .seek(SeekFrom::Start(self.position))
                .map_err(|_| SourceError::Closed)?;
        }
    }
}

// ---------------------------------------------------------------------------
// Network PCM sources
// ---------------------------------------------------------------------------

/// Int16 mono PCM over TCP at a declared rate, with optional rigctl
/// retune control.
pub struct TcpPcmSource {
    stream: TcpStream,
    sample_rate: u32,
    rigctl: Option<RigctlClient>,
    last_power: f32,
    stall_timeout: Duration,
}

impl TcpPcmSource {
    pub fn connect<A: ToSocketAddrs + std::fmt::Display>(
        addr: A,
        sample_rate: u32,
        rigctl: Option<RigctlClient>,
    ) -> Result<Self, SourceError> {
        let stream = TcpStream::connect(&addr).map_err(|e| SourceError::OpenFailed {
            path: addr.to_string(),
            reason: e.to_string(),
        })?;
        let stall_timeout = Duration::from_secs(5);
        stream
            .set_read_timeout(Some(stall_timeout))
            .map_err(|e| SourceError::OpenFailed {
                path: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            stream,
            sample_rate,
            rigctl,
            last_power: -120.0,
            stall_timeout,
        })
    }
}

impl SampleSource for TcpPcmSource {
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError> {
        let mut raw = vec![0u8; out.len() * 2];
        match self.stream.read(&mut raw) {
            Ok(0) => Ok(0),
            Ok(n) => {
                let samples = n / 2;
                for (i, chunk) in raw[..samples * 2].chunks_exact(2).enumerate() {
                    out[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
                }
                self.last_power = power_dbfs(&out[..samples]);
                Ok(samples)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(SourceError::Stalled {
                    timeout_secs: self.stall_timeout.as_secs_f64(),
                })
            }
            Err(_) => Ok(0),
        }
    }

    fn tune(&mut self, freq_hz: u32) -> Result<(), SourceError> {
        match self.rigctl.as_mut() {
            Some(rigctl) => rigctl.tune(freq_hz),
            None => Ok(()), // no control path; the far end owns tuning
        }
    }

    fn return_power(&self) -> f32 {
        self.last_power
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Int16 mono PCM datagrams over UDP.
pub struct UdpPcmSource {
    socket: UdpSocket,
    sample_rate: u32,
    last_power: f32,
    stall_timeout: Duration,
}

impl UdpPcmSource {
    pub fn bind(addr: &str, sample_rate: u32) -> Result<Self, SourceError> {
        let socket = UdpSocket::bind(addr).map_err(|e| SourceError::OpenFailed {
            path: addr.to_string(),
            reason: e.to_string(),
        })?;
        let stall_timeout = Duration::from_secs(5);
        socket
            .set_read_timeout(Some(stall_timeout))
            .map_err(|e| SourceError::OpenFailed {
                path: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            socket,
            sample_rate,
            last_power: -120.0,
            stall_timeout,
        })
    }
}

impl SampleSource for UdpPcmSource {
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError> {
        let mut raw = vec![0u8; out.len() * 2];
        match self.socket.recv(&mut raw) {
            Ok(n) => {
                let samples = n / 2;
                for (i, chunk) in raw[..samples * 2].chunks_exact(2).enumerate() {
                    out[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
                }
                self.last_power = power_dbfs(&out[..samples]);
                Ok(samples)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(SourceError::Stalled {
                    timeout_secs: self.stall_timeout.as_secs_f64(),
                })
            }
            Err(_) => Ok(0),
        }
    }

    fn tune(&mut self, _freq_hz: u32) -> Result<(), SourceError> {
        Ok(())
    }

    fn return_power(&self) -> f32 {
        self.last_power
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ---------------------------------------------------------------------------
// Rigctl retune client
// ---------------------------------------------------------------------------

/// Minimal Hamlib netrigctl client: `F <hz>` to set frequency.
pub struct RigctlClient {
    stream: BufReader<TcpStream>,
}

impl RigctlClient {
    pub fn connect(host: &str, port: u16) -> Result<Self, SourceError> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr).map_err(|e| SourceError::OpenFailed {
            path: addr.clone(),
            reason: e.to_string(),
        })?;
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .map_err(|e| SourceError::OpenFailed {
                path: addr,
                reason: e.to_string(),
            })?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    pub fn tune(&mut self, freq_hz: u32) -> Result<(), SourceError> {
        let fail = |reason: String| SourceError::TuneFailed { freq_hz, reason };
        self.stream
            .get_mut()
            .write_all(format!("F {}\n", freq_hz).as_bytes())
            .map_err(|e| fail(e.to_string()))?;
        let mut line = String::new();
        self.stream
            .read_line(&mut line)
            .map_err(|e| fail(e.to_string()))?;
        if line.trim() != "RPRT 0" {
            return Err(fail(format!("rigctl answered {:?}", line.trim())));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retune coalescing
// ---------------------------------------------------------------------------

/// Wraps a source and coalesces repeated retunes: calling `tune(f)` twice
/// within [`TUNE_COALESCE`] is observationally one call.
pub struct Retuner<S: SampleSource> {
    inner: S,
    last_tune: Option<(u32, Instant)>,
}

impl<S: SampleSource> Retuner<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            last_tune: None,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: SampleSource> SampleSource for Retuner<S> {
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError> {
        self.inner.read(out)
    }

    fn tune(&mut self, freq_hz: u32) -> Result<(), SourceError> {
        if let Some((freq, at)) = self.last_tune {
            if freq == freq_hz && at.elapsed() < TUNE_COALESCE {
                return Ok(());
            }
        }
        self.inner.tune(freq_hz)?;
        self.last_tune = Some((freq_hz, Instant::now()));
        Ok(())
    }

    fn set_mod_bandwidth(&mut self, khz: u16) {
        self.inner.set_mod_bandwidth(khz);
    }

    fn return_power(&self) -> f32 {
        self.inner.return_power()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }
}

// ---------------------------------------------------------------------------
// Deterministic source for tests and the self-test mode
// ---------------------------------------------------------------------------

/// Plays a fixed sample vector, optionally looping. Counts tune calls so
/// tests can assert on retune behavior.
pub struct SyntheticSource {
    samples: Vec<i16>,
    position: usize,
    looping: bool,
    sample_rate: u32,
    pub tunes: Vec<u32>,
    last_power: f32,
}

impl SyntheticSource {
    pub fn new(samples: Vec<i16>, sample_rate: u32, looping: bool) -> Self {
        Self {
            samples,
            position: 0,
            looping,
            sample_rate,
            tunes: Vec::new(),
            last_power: -120.0,
        }
    }
}

impl SampleSource for SyntheticSource {
    fn read(&mut self, out: &mut [i16]) -> Result<usize, SourceError> {
        if self.samples.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        while written < out.len() {
            if self.position >= self.samples.len() {
                if !self.looping {
                    break;
                }
                self.position = 0;
            }
            out[written] = self.samples[self.position];
            self.position += 1;
            written += 1;
        }
        self.last_power = power_dbfs(&out[..written]);
        Ok(written)
    }

    fn tune(&mut self, freq_hz: u32) -> Result<(), SourceError> {
        self.tunes.push(freq_hz);
        Ok(())
    }

    fn return_power(&self) -> f32 {
        self.last_power
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_plays_and_ends() {
        let mut src = SyntheticSource::new(vec![1, 2, 3], 48_000, false);
        let mut buf = [0i16; 8];
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn synthetic_source_loops() {
        let mut src = SyntheticSource::new(vec![5, -5], 48_000, true);
        let mut buf = [0i16; 6];
        assert_eq!(src.read(&mut buf).unwrap(), 6);
        assert_eq!(buf, [5, -5, 5, -5, 5, -5]);
    }

    #[test]
    fn retuner_coalesces_within_window() {
        let src = SyntheticSource::new(vec![0], 48_000, true);
        let mut retuner = Retuner::new(src);

        retuner.tune(851_000_000).unwrap();
        retuner.tune(851_000_000).unwrap(); // coalesced
        retuner.tune(852_000_000).unwrap(); // different freq passes through

        let inner = retuner.into_inner();
        assert_eq!(inner.tunes, vec![851_000_000, 852_000_000]);
    }

    #[test]
    fn retuner_repeats_after_window() {
        let src = SyntheticSource::new(vec![0], 48_000, true);
        let mut retuner = Retuner::new(src);
        retuner.tune(851_000_000).unwrap();
        std::thread::sleep(TUNE_COALESCE + Duration::from_millis(10));
        retuner.tune(851_000_000).unwrap();
        assert_eq!(retuner.into_inner().tunes.len(), 2);
    }

    #[test]
    fn power_of_silence_is_floor() {
        assert_eq!(power_dbfs(&[]), -120.0);
        assert_eq!(power_dbfs(&[0, 0, 0]), -120.0);
        // Full-scale square wave is ~0 dBFS.
        let full: Vec<i16> = vec![32767, -32767, 32767, -32767];
        assert!(power_dbfs(&full).abs() < 0.1);
    }

    #[test]
    fn dibit_file_source_reads_and_stalls() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("dvrx-dibits-{}", std::process::id()));
        std::fs::write(&path, [0u8, 1, 3, 1, 0]).unwrap();

        let mut src = DibitFileSource::open(&path).unwrap();
        src.set_stall_timeout(Duration::from_millis(50));

        let mut buf = [0u8; 16];
        let n = src.read_dibits(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], &[0, 1, 3, 1, 0]);

        // Nothing appended: the next read stalls.
        match src.read_dibits(&mut buf) {
            Err(SourceError::Stalled { .. }) => {}
            other => panic!("expected stall, got {:?}", other),
        }
        std::fs::remove_file(path).ok();
    }
}
