//! Mono 24-bit PCM WAV writer for channel recordings.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::RecordError;

// WAV file format constants
// See: http://soundfile.sapp.org/doc/WaveFormat/

/// Byte offset of the file size field in WAV header (RIFF chunk size).
const WAV_FILE_SIZE_OFFSET: u64 = 4;

/// Byte offset of the data chunk size field in WAV header.
const WAV_DATA_SIZE_OFFSET: u64 = 40;

/// Size of the WAV header in bytes (RIFF + fmt + data chunk headers).
const WAV_HEADER_SIZE: usize = 44;

/// Size of the fmt chunk data (16 bytes for PCM).
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// Audio format code for PCM (uncompressed).
const WAV_FORMAT_PCM: u16 = 1;

/// Bits per sample; recordings are fixed at 24-bit PCM.
const WAV_BITS_PER_SAMPLE: u16 = 24;

/// Bytes per sample (24-bit = 3 bytes).
const BYTES_PER_SAMPLE: u64 = 3;

/// Channel files are always mono.
const WAV_CHANNELS: u16 = 1;

/// Largest 24-bit signed sample value, for float conversion.
const I24_MAX: f32 = 8_388_607.0;

/// Writes one channel's samples to a mono 24-bit WAV file.
///
/// A placeholder header is written on create and the size fields are
/// patched on [`finalize`](WavWriter::finalize). If the writer is dropped
/// without being finalized (a writer thread that hit an I/O error), the
/// header is still patched best-effort so samples written so far stay
/// readable.
pub struct WavWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    sample_rate: u32,
    samples_written: u64,
    finalized: bool,
}

impl WavWriter {
    /// Creates the file and writes a placeholder header.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError::File`] if the file cannot be created or the
    /// header cannot be written.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, RecordError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| RecordError::file(&path, e))?;
        let mut writer = BufWriter::new(file);

        Self::write_header(&mut writer, sample_rate, 0)
            .map_err(|e| RecordError::file(&path, e))?;

        Ok(Self {
            path,
            writer,
            sample_rate,
            samples_written: 0,
            finalized: false,
        })
    }

    /// Appends one block of float samples, converted to 24-bit PCM.
    ///
    /// Samples outside ±1.0 are clamped.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError::File`] on a failed write.
    pub fn write_block(&mut self, samples: &[f32]) -> Result<(), RecordError> {
        for &sample in samples {
            let bytes = encode_sample(sample);
            self.writer
                .write_all(&bytes)
                .map_err(|e| RecordError::file(&self.path, e))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Number of samples written so far.
    #[must_use]
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Patches the header with the final sizes and flushes the file.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError::File`] if the header cannot be updated.
    pub fn finalize(mut self) -> Result<u64, RecordError> {
        self.patch_header()
            .map_err(|e| RecordError::file(&self.path, e))?;
        self.finalized = true;
        Ok(self.samples_written)
    }

    /// Writes a complete WAV header with the given data size.
    fn write_header(
        writer: &mut BufWriter<File>,
        sample_rate: u32,
        data_size: u32,
    ) -> std::io::Result<()> {
        // RIFF container header
        writer.write_all(b"RIFF")?;
        let file_size = WAV_HEADER_SIZE as u32 - 8 + data_size;
        writer.write_all(&file_size.to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        // fmt subchunk (format specification)
        writer.write_all(b"fmt ")?;
        writer.write_all(&WAV_FMT_CHUNK_SIZE.to_le_bytes())?;
        writer.write_all(&WAV_FORMAT_PCM.to_le_bytes())?;
        writer.write_all(&WAV_CHANNELS.to_le_bytes())?;
        writer.write_all(&sample_rate.to_le_bytes())?;

        let bytes_per_sample = u32::from(WAV_BITS_PER_SAMPLE / 8);
        let byte_rate = sample_rate * u32::from(WAV_CHANNELS) * bytes_per_sample;
        writer.write_all(&byte_rate.to_le_bytes())?;

        let block_align = WAV_CHANNELS * (WAV_BITS_PER_SAMPLE / 8);
        writer.write_all(&block_align.to_le_bytes())?;
        writer.write_all(&WAV_BITS_PER_SAMPLE.to_le_bytes())?;

        // data subchunk header
        writer.write_all(b"data")?;
        writer.write_all(&data_size.to_le_bytes())?;

        Ok(())
    }

    /// Seeks back and updates the size fields with the actual data size.
    fn patch_header(&mut self) -> std::io::Result<()> {
        let data_size = (self.samples_written * BYTES_PER_SAMPLE) as u32;
        let file_size = WAV_HEADER_SIZE as u32 - 8 + data_size;

        self.writer.seek(SeekFrom::Start(WAV_FILE_SIZE_OFFSET))?;
        self.writer.write_all(&file_size.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET))?;
        self.writer.write_all(&data_size.to_le_bytes())?;

        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;

        Ok(())
    }
}

impl Drop for WavWriter {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(e) = self.patch_header() {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "could not patch WAV header on drop"
                );
            }
        }
    }
}

/// Converts a float sample to 3 little-endian bytes of 24-bit PCM.
fn encode_sample(sample: f32) -> [u8; 3] {
    let value = (sample.clamp(-1.0, 1.0) * I24_MAX) as i32;
    let bytes = value.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}
