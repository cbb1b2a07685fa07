use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::{AudioSink, AudioSource, DeviceError, ReadStatus};
use crate::audio::CHANNELS;

const FRAME_BYTES: usize = 2 * CHANNELS;

/// Headerless s16le interleaved stereo.
pub struct RawSource {
    backend: &'static str,
    reader: Box<dyn Read + Send>,
    sample_rate: u32,
    bytes: Vec<u8>,
    // Bytes of an incomplete frame kept for the next read.
    pending: usize,
}

impl RawSource {
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self, DeviceError> {
        let file = File::open(path).map_err(|e| DeviceError::Open {
            backend: "raw",
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_reader("raw", Box::new(file), sample_rate))
    }

    pub fn stdin(sample_rate: u32) -> Self {
        Self::from_reader("stdio", Box::new(std::io::stdin()), sample_rate)
    }

    pub fn from_reader(
        backend: &'static str,
        reader: Box<dyn Read + Send>,
        sample_rate: u32,
    ) -> Self {
        Self {
            backend,
            reader,
            sample_rate,
            bytes: Vec::new(),
            pending: 0,
        }
    }
}

impl AudioSource for RawSource {
    fn backend(&self) -> &'static str {
        self.backend
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, samples: &mut [i16]) -> Result<ReadStatus, DeviceError> {
        let wanted = samples.len() / CHANNELS * FRAME_BYTES;
        if self.bytes.len() < wanted {
            self.bytes.resize(wanted, 0);
        }

        let mut filled = self.pending;
        while filled < wanted {
            match self.reader.read(&mut self.bytes[filled..wanted]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(DeviceError::Read {
                        backend: self.backend,
                        message: e.to_string(),
                    })
                }
            }
        }

        let whole = filled / FRAME_BYTES * FRAME_BYTES;
        for (sample, bytes) in samples.iter_mut().zip(self.bytes[..whole].chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        self.bytes.copy_within(whole..filled, 0);
        self.pending = filled - whole;

        if whole == 0 {
            Ok(ReadStatus::EndOfStream)
        } else {
            Ok(ReadStatus::Frames(whole / FRAME_BYTES))
        }
    }
}

pub struct RawSink {
    backend: &'static str,
    writer: Box<dyn Write + Send>,
    sample_rate: u32,
    bytes: Vec<u8>,
}

impl RawSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, DeviceError> {
        let file = File::create(path).map_err(|e| DeviceError::Open {
            backend: "raw",
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_writer(
            "raw",
            Box::new(BufWriter::new(file)),
            sample_rate,
        ))
    }

    pub fn stdout(sample_rate: u32) -> Self {
        Self::from_writer("stdio", Box::new(std::io::stdout()), sample_rate)
    }

    pub fn from_writer(
        backend: &'static str,
        writer: Box<dyn Write + Send>,
        sample_rate: u32,
    ) -> Self {
        Self {
            backend,
            writer,
            sample_rate,
            bytes: Vec::new(),
        }
    }
}

impl AudioSink for RawSink {
    fn backend(&self) -> &'static str {
        self.backend
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        self.bytes.clear();
        self.bytes
            .extend(samples.iter().flat_map(|sample| sample.to_le_bytes()));
        self.writer
            .write_all(&self.bytes)
            .map_err(|e| DeviceError::Write {
                backend: self.backend,
                message: e.to_string(),
            })
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.writer.flush().map_err(|e| DeviceError::Close {
            backend: self.backend,
            message: e.to_string(),
        })
    }
}

/// 16-bit PCM WAV input; mono files are spread to both channels.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    channels: usize,
    sample_rate: u32,
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let open_error = |message: String| DeviceError::Open {
            backend: "wav",
            name: path.display().to_string(),
            message,
        };

        let reader = WavReader::open(path).map_err(|e| open_error(e.to_string()))?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(open_error(format!(
                "expected 16-bit PCM, found {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }
        if !(1..=2).contains(&spec.channels) {
            return Err(open_error(format!(
                "expected mono or stereo, found {} channels",
                spec.channels
            )));
        }

        Ok(Self {
            reader,
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
        })
    }
}

impl AudioSource for WavSource {
    fn backend(&self) -> &'static str {
        "wav"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, samples: &mut [i16]) -> Result<ReadStatus, DeviceError> {
        let frames = samples.len() / CHANNELS;
        let channels = self.channels;
        let mut decoded = self.reader.samples::<i16>();
        let mut read = 0;

        'frames: while read < frames {
            let mut frame = [0i16; CHANNELS];
            for slot in frame.iter_mut().take(channels) {
                match decoded.next() {
                    Some(Ok(sample)) => *slot = sample,
                    Some(Err(e)) => {
                        return Err(DeviceError::Read {
                            backend: "wav",
                            message: e.to_string(),
                        })
                    }
                    None => break 'frames,
                }
            }
            if channels == 1 {
                frame[1] = frame[0];
            }
            samples[read * CHANNELS..(read + 1) * CHANNELS].copy_from_slice(&frame);
            read += 1;
        }

        if read == 0 {
            Ok(ReadStatus::EndOfStream)
        } else {
            Ok(ReadStatus::Frames(read))
        }
    }
}

/// 16-bit stereo PCM WAV output, finalized on close.
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    sample_rate: u32,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, DeviceError> {
        let spec = WavSpec {
            channels: CHANNELS as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(|e| DeviceError::Open {
            backend: "wav",
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            writer: Some(writer),
            sample_rate,
        })
    }
}

impl AudioSink for WavSink {
    fn backend(&self) -> &'static str {
        "wav"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        let writer = self.writer.as_mut().ok_or_else(|| DeviceError::Write {
            backend: "wav",
            message: "writer already finalized".to_string(),
        })?;
        for &sample in samples {
            writer.write_sample(sample).map_err(|e| DeviceError::Write {
                backend: "wav",
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        match self.writer.take() {
            Some(writer) => writer.finalize().map_err(|e| DeviceError::Close {
                backend: "wav",
                message: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_raw_source_keeps_partial_frame_for_next_read() {
        // Two whole frames plus half of a third.
        let mut bytes = Vec::new();
        for sample in [1i16, -1, 2, -2, 3] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let mut source = RawSource::from_reader("raw", Box::new(Cursor::new(bytes)), 48_000);

        let mut samples = [0i16; 8];
        assert_eq!(source.read(&mut samples).unwrap(), ReadStatus::Frames(2));
        assert_eq!(&samples[..4], &[1, -1, 2, -2]);
        assert_eq!(source.read(&mut samples).unwrap(), ReadStatus::EndOfStream);
    }

    #[test]
    fn test_raw_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpx.raw");
        let written: Vec<i16> = (0..512).map(|i| (i * 61 - 15_000) as i16).collect();

        let mut sink = RawSink::create(&path, 192_000).unwrap();
        sink.write(&written).unwrap();
        sink.close().unwrap();

        let mut source = RawSource::open(&path, 192_000).unwrap();
        let mut read = vec![0i16; 1024];
        assert_eq!(source.read(&mut read).unwrap(), ReadStatus::Frames(256));
        assert_eq!(&read[..512], written.as_slice());
    }

    #[test]
    fn test_wav_sink_finalizes_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpx.wav");

        let mut sink = WavSink::create(&path, 192_000).unwrap();
        sink.write(&[100, -100, 200, -200]).unwrap();
        sink.close().unwrap();
        assert!(sink.write(&[0, 0]).is_err());

        let mut source = WavSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 192_000);
        let mut samples = [0i16; 8];
        assert_eq!(source.read(&mut samples).unwrap(), ReadStatus::Frames(2));
        assert_eq!(&samples[..4], &[100, -100, 200, -200]);
        assert_eq!(source.read(&mut samples).unwrap(), ReadStatus::EndOfStream);
    }

    #[test]
    fn test_mono_wav_is_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for sample in [7i16, -7, 9] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 44_100);
        let mut samples = [0i16; 4];
        assert_eq!(source.read(&mut samples).unwrap(), ReadStatus::Frames(2));
        assert_eq!(samples, [7, 7, -7, -7]);
        assert_eq!(source.read(&mut samples).unwrap(), ReadStatus::Frames(1));
        assert_eq!(&samples[..2], &[9, 9]);
    }

    #[test]
    fn test_24_bit_wav_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 24,
            sample_format: SampleFormat::Int,
        };
        WavWriter::create(&path, spec).unwrap().finalize().unwrap();

        assert!(matches!(
            WavSource::open(&path),
            Err(DeviceError::Open { backend: "wav", .. })
        ));
    }
}
