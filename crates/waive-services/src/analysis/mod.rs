//! Single-pass audio file scans for peak, activity bounds, and first transient

pub mod cache;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, warn};

pub use cache::{AnalysisCache, CacheKey, DEFAULT_CACHE_CAPACITY};

/// Frames read between cancellation checks
pub const ANALYSIS_BLOCK_FRAMES: usize = 8192;

/// One-pole envelope coefficient used for transient detection
const ENVELOPE_COEFF: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSummary {
    pub valid: bool,
    pub cancelled: bool,
    pub sample_rate: u32,
    /// Length in frames
    pub total_samples: u64,
    pub peak_gain: f32,
    /// Frame indices, -1 when absent
    pub first_above_sample: i64,
    pub last_above_sample: i64,
    pub first_transient_sample: i64,
}

impl AnalysisSummary {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            cancelled: false,
            sample_rate: 0,
            total_samples: 0,
            peak_gain: 0.0,
            first_above_sample: -1,
            last_above_sample: -1,
            first_transient_sample: -1,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::invalid()
        }
    }

    pub fn has_activity(&self) -> bool {
        self.valid && self.first_above_sample >= 0 && self.last_above_sample >= 0
    }
}

/// Interleaved f32 samples of an opened WAV file
pub(crate) struct SampleStream {
    pub spec: hound::WavSpec,
    /// Length in frames
    pub frames: u64,
    pub samples: Box<dyn Iterator<Item = f32>>,
}

/// Open a WAV file for streaming. Returns None if missing, unreadable, or empty.
pub(crate) fn open_sample_stream(path: &Path) -> Option<SampleStream> {
    let reader: hound::WavReader<BufReader<File>> = match hound::WavReader::open(path) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to open audio file");
            return None;
        }
    };

    let spec = reader.spec();
    let frames = u64::from(reader.duration());
    if spec.channels == 0 || spec.sample_rate == 0 || frames == 0 {
        return None;
    }

    let samples: Box<dyn Iterator<Item = f32>> = match spec.sample_format {
        hound::SampleFormat::Float => Box::new(reader.into_samples::<f32>().map_while(Result::ok)),
        hound::SampleFormat::Int => {
            let max_val = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            Box::new(
                reader
                    .into_samples::<i32>()
                    .map_while(Result::ok)
                    .map(move |s| s as f32 / max_val),
            )
        }
    };

    Some(SampleStream { spec, frames, samples })
}

/// Scan `file` once.
///
/// `activity_threshold_gain` bounds the first/last active frame. A transient
/// is the first active frame whose peak exceeds the running envelope by at
/// least `transient_rise_threshold_gain`; if none is found the first active
/// frame is used. Valid results are stored in `cache` when given.
pub fn analyse_audio_file(
    file: &Path,
    activity_threshold_gain: f32,
    transient_rise_threshold_gain: f32,
    is_cancelled: impl Fn() -> bool,
    cache: Option<&AnalysisCache>,
) -> AnalysisSummary {
    let key = CacheKey::new(file, activity_threshold_gain, transient_rise_threshold_gain);
    if let Some(hit) = cache.and_then(|c| c.get(&key)) {
        return hit;
    }

    let Some(stream) = open_sample_stream(file) else {
        return AnalysisSummary::invalid();
    };

    let channels = usize::from(stream.spec.channels);
    let threshold = activity_threshold_gain.max(0.0);
    let mut samples = stream.samples;

    let mut summary = AnalysisSummary {
        valid: true,
        sample_rate: stream.spec.sample_rate,
        total_samples: stream.frames,
        ..AnalysisSummary::invalid()
    };
    let mut envelope = 0.0_f32;
    let mut frame_index: i64 = 0;
    let mut block = Vec::with_capacity(ANALYSIS_BLOCK_FRAMES * channels);

    loop {
        if is_cancelled() {
            debug!(path = %file.display(), "Analysis cancelled");
            return AnalysisSummary::cancelled();
        }

        block.clear();
        block.extend(samples.by_ref().take(ANALYSIS_BLOCK_FRAMES * channels));
        if block.is_empty() {
            break;
        }

        for frame in block.chunks(channels) {
            let peak = frame.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
            summary.peak_gain = summary.peak_gain.max(peak);

            if peak >= threshold {
                if summary.first_above_sample < 0 {
                    summary.first_above_sample = frame_index;
                }
                summary.last_above_sample = frame_index;
            }

            if summary.first_transient_sample < 0
                && summary.first_above_sample >= 0
                && peak >= threshold
                && peak - envelope >= transient_rise_threshold_gain
            {
                summary.first_transient_sample = frame_index;
            }

            envelope += (peak - envelope) * ENVELOPE_COEFF;
            frame_index += 1;
        }
    }

    if summary.first_transient_sample < 0 {
        summary.first_transient_sample = summary.first_above_sample;
    }

    if let Some(cache) = cache {
        cache.put(key, summary.clone());
    }
    summary
}

/// dB to linear gain
pub fn db_to_gain(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Linear gain to dB, floored at -120 dB for silence
pub fn gain_to_db(gain: f64) -> f64 {
    const FLOOR_DB: f64 = -120.0;
    if gain > 0.0 { (20.0 * gain.log10()).max(FLOOR_DB) } else { FLOOR_DB }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// Write a mono 16-bit WAV from a per-frame function
    pub fn write_mono_wav(path: &Path, sample_rate: u32, frames: usize, f: impl Fn(usize) -> f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((f(i) * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
}
