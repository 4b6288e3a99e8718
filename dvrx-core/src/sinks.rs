//! Audio sinks: soundcard, raw stdout, UDP blaster and WAV files.
//!
//! Sinks receive mixed PCM from the demod thread in synchronous calls; the
//! soundcard path hands off to cpal's own callback thread through a small
//! buffer. Raw paths keep exact byte contracts: 16-bit LE on the short
//! path, IEEE float LE on the float path, one datagram per 160-sample
//! frame on UDP.

use std::collections::VecDeque;
use std::io::Write;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::errors::AudioError;
use crate::vocoder::PCM_FRAME_SAMPLES;

/// Output rate of the voice path (160 samples per 20 ms).
pub const VOICE_RATE: u32 = 8000;

pub trait AudioSink: Send {
    fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError>;

    /// Interleaved L/R. The default fold-down keeps mono-only sinks
    /// working behind a stereo mixer.
    fn write_stereo(&mut self, interleaved: &[f32]) -> Result<(), AudioError> {
        let mono: Vec<f32> = interleaved
            .chunks_exact(2)
            .map(|p| (p[0] + p[1]) / 2.0)
            .collect();
        self.write_mono(&mono)
    }

    fn flush(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Discards everything; headless decoding and tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write_mono(&mut self, _samples: &[f32]) -> Result<(), AudioError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Soundcard via cpal
// ---------------------------------------------------------------------------

/// Linear-interpolating rate converter from the 8 kHz voice path to the
/// device rate.
struct RateConverter {
    ratio: f64,
    phase: f64,
    previous: f32,
}

impl RateConverter {
    fn new(from: u32, to: u32) -> Self {
        Self {
            ratio: from as f64 / to as f64,
            phase: 0.0,
            previous: 0.0,
        }
    }

    fn convert(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for &sample in input {
            while self.phase < 1.0 {
                let interp = self.previous + (sample - self.previous) * self.phase as f32;
                out.push(interp);
                self.phase += self.ratio;
            }
            self.phase -= 1.0;
            self.previous = sample;
        }
    }
}

/// Default output device through cpal. Mixed audio is rate-converted and
/// parked in a bounded queue that the device callback drains; overruns
/// drop the oldest audio rather than blocking the demod thread for long.
pub struct DeviceSink {
    queue: Arc<Mutex<VecDeque<f32>>>,
    converter: RateConverter,
    _stream: cpal::Stream,
}

/// Bound on queued device samples (~1 s at 48 kHz stereo).
const DEVICE_QUEUE_LIMIT: usize = 96_000;

impl DeviceSink {
    pub fn open() -> Result<Self, AudioError> {
        let fail = |reason: String| AudioError::SinkOpenFailed {
            kind: "device".into(),
            reason,
        };

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| fail("no output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| fail(e.to_string()))?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(fail(format!(
                "unsupported sample format {:?}",
                config.sample_format()
            )));
        }
        let device_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let callback_queue = queue.clone();

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut q = callback_queue.lock().expect("sink queue poisoned");
                    for frame in data.chunks_mut(channels) {
                        let sample = q.pop_front().unwrap_or(0.0);
                        for slot in frame.iter_mut() {
                            *slot = sample;
                        }
                    }
                },
                |err| eprintln!("audio device error: {}", err),
                None,
            )
            .map_err(|e| fail(e.to_string()))?;
        stream.play().map_err(|e| fail(e.to_string()))?;

        Ok(Self {
            queue,
            converter: RateConverter::new(VOICE_RATE, device_rate),
            _stream: stream,
        })
    }
}

impl AudioSink for DeviceSink {
    fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        let mut converted = Vec::with_capacity(samples.len() * 8);
        self.converter.convert(samples, &mut converted);
        let mut q = self.queue.lock().expect("sink queue poisoned");
        for s in converted {
            if q.len() >= DEVICE_QUEUE_LIMIT {
                q.pop_front();
            }
            q.push_back(s);
        }
        Ok(())
    }
}

// SAFETY: cpal::Stream is !Send on some backends, but the sink never
// leaves the demod thread after construction; the queue is the only state
// the callback thread shares and it is mutex-protected.
unsafe impl Send for DeviceSink {}

// ---------------------------------------------------------------------------
// Raw stdout
// ---------------------------------------------------------------------------

/// Raw PCM on stdout: 16-bit LE (short path) or IEEE float LE.
pub struct StdoutSink {
    float_output: bool,
}

impl StdoutSink {
    pub fn new(float_output: bool) -> Self {
        Self { float_output }
    }

    fn write_samples(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        if self.float_output {
            for &s in samples {
                bytes.extend_from_slice(&s.to_le_bytes());
            }
        } else {
            for &s in samples {
                let clamped = (s.clamp(-32768.0, 32767.0)) as i16;
                bytes.extend_from_slice(&clamped.to_le_bytes());
            }
        }
        lock.write_all(&bytes)
            .map_err(|e| AudioError::WriteFailed {
                reason: e.to_string(),
            })
    }
}

impl AudioSink for StdoutSink {
    fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        self.write_samples(samples)
    }

    fn write_stereo(&mut self, interleaved: &[f32]) -> Result<(), AudioError> {
        self.write_samples(interleaved)
    }

    fn flush(&mut self) -> Result<(), AudioError> {
        std::io::stdout()
            .flush()
            .map_err(|e| AudioError::WriteFailed {
                reason: e.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// UDP blaster
// ---------------------------------------------------------------------------

/// One datagram per 160-sample frame, 16-bit LE, exact byte count.
/// Partial frames are held back until completed.
pub struct UdpSink {
    socket: UdpSocket,
    target: String,
    pending: Vec<f32>,
}

impl UdpSink {
    pub fn connect(target: &str) -> Result<Self, AudioError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| AudioError::SinkOpenFailed {
            kind: "udp".into(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            socket,
            target: target.to_string(),
            pending: Vec::new(),
        })
    }

    fn blast(&mut self) -> Result<(), AudioError> {
        while self.pending.len() >= PCM_FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..PCM_FRAME_SAMPLES).collect();
            let mut datagram = Vec::with_capacity(PCM_FRAME_SAMPLES * 2);
            for s in frame {
                let clamped = (s.clamp(-32768.0, 32767.0)) as i16;
                datagram.extend_from_slice(&clamped.to_le_bytes());
            }
            self.socket
                .send_to(&datagram, &self.target)
                .map_err(|e| AudioError::WriteFailed {
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl AudioSink for UdpSink {
    fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        self.pending.extend_from_slice(samples);
        self.blast()
    }
}

// ---------------------------------------------------------------------------
// WAV writer
// ---------------------------------------------------------------------------

/// Timestamped WAV files: `YYYYMMDD_HHMMSS_<suffix>.wav` in a directory.
/// `rotate` closes the current file and starts the next one; the receiver
/// rotates at call boundaries.
pub struct WavSink {
    dir: PathBuf,
    suffix: String,
    stereo: bool,
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
}

impl WavSink {
    pub fn create(dir: &Path, suffix: &str, stereo: bool) -> Result<Self, AudioError> {
        std::fs::create_dir_all(dir).map_err(|e| AudioError::SinkOpenFailed {
            kind: "wav".into(),
            reason: e.to_string(),
        })?;
        let mut sink = Self {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
            stereo,
            writer: None,
        };
        sink.rotate()?;
        Ok(sink)
    }

    /// Current output path, composed from the wall clock.
    fn next_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.dir.join(format!("{}_{}.wav", stamp, self.suffix))
    }

    pub fn rotate(&mut self) -> Result<(), AudioError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| AudioError::WriteFailed {
                reason: e.to_string(),
            })?;
        }
        let spec = hound::WavSpec {
            channels: if self.stereo { 2 } else { 1 },
            sample_rate: VOICE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(self.next_path(), spec).map_err(|e| {
            AudioError::SinkOpenFailed {
                kind: "wav".into(),
                reason: e.to_string(),
            }
        })?;
        self.writer = Some(writer);
        Ok(())
    }

    fn write_samples(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        let writer = self.writer.as_mut().ok_or_else(|| AudioError::WriteFailed {
            reason: "wav writer closed".into(),
        })?;
        for &s in samples {
            let clamped = (s.clamp(-32768.0, 32767.0)) as i16;
            writer
                .write_sample(clamped)
                .map_err(|e| AudioError::WriteFailed {
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl AudioSink for WavSink {
    fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        if self.stereo {
            // Duplicate mono onto both channels to keep the file layout.
            let doubled: Vec<f32> = samples.iter().flat_map(|&s| [s, s]).collect();
            self.write_samples(&doubled)
        } else {
            self.write_samples(samples)
        }
    }

    fn write_stereo(&mut self, interleaved: &[f32]) -> Result<(), AudioError> {
        if self.stereo {
            self.write_samples(interleaved)
        } else {
            let mono: Vec<f32> = interleaved
                .chunks_exact(2)
                .map(|p| (p[0] + p[1]) / 2.0)
                .collect();
            self.write_samples(&mono)
        }
    }

    fn flush(&mut self) -> Result<(), AudioError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| AudioError::WriteFailed {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_converter_upsamples() {
        let mut conv = RateConverter::new(8000, 48_000);
        let mut out = Vec::new();
        conv.convert(&[0.0; 80], &mut out);
        // 80 samples at 8 kHz is 10 ms, i.e. ~480 device samples.
        assert!((out.len() as i64 - 480).abs() <= 6, "got {}", out.len());
    }

    #[test]
    fn udp_sink_sends_exact_frames() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let target = format!("127.0.0.1:{}", receiver.local_addr().unwrap().port());

        let mut sink = UdpSink::connect(&target).unwrap();
        // One and a half frames: exactly one datagram must leave.
        sink.write_mono(&vec![100.0; PCM_FRAME_SAMPLES + 80]).unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, PCM_FRAME_SAMPLES * 2);
        assert!(receiver.recv_from(&mut buf).is_err(), "half frame leaked");

        // Completing the frame releases the second datagram.
        sink.write_mono(&vec![100.0; 80]).unwrap();
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, PCM_FRAME_SAMPLES * 2);
    }

    #[test]
    fn wav_sink_writes_timestamped_file() {
        let dir = std::env::temp_dir().join(format!("dvrx-wav-{}", std::process::id()));
        let mut sink = WavSink::create(&dir, "call", false).unwrap();
        sink.write_mono(&vec![0.5; PCM_FRAME_SAMPLES]).unwrap();
        sink.flush().unwrap();

        let entries: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().into_string().unwrap();
        assert!(name.ends_with("_call.wav"), "name was {}", name);
        // YYYYMMDD_HHMMSS prefix is 15 characters.
        assert_eq!(name.len(), "YYYYMMDD_HHMMSS_call.wav".len());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn stereo_fold_down_default() {
        struct Capture(Vec<f32>);
        impl AudioSink for Capture {
            fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError> {
                self.0.extend_from_slice(samples);
                Ok(())
            }
        }
        let mut c = Capture(Vec::new());
        c.write_stereo(&[1.0, 0.0, 0.5, 0.5]).unwrap();
        assert_eq!(c.0, vec![0.5, 0.5]);
    }
}
