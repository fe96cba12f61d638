// AdaptiveThreshold - running signal/noise peak levels for QRS detection
//
// The threshold sits between two exponentially tracked levels:
//   threshold = noise + ratio * (signal - noise)
// Accepted beats pull the signal level, rejected candidates pull the noise
// level, so the threshold follows slow amplitude drift across a recording.

/// Weight of the newest peak in the running estimates
const PEAK_WEIGHT: f64 = 0.125;

/// Weight of a beat recovered by searchback
const SEARCHBACK_WEIGHT: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThreshold {
    signal_level: f64,
    noise_level: f64,
    ratio: f64,
}

impl AdaptiveThreshold {
    pub fn new(signal_level: f64, noise_level: f64, ratio: f64) -> Self {
        Self {
            signal_level,
            noise_level,
            ratio,
        }
    }

    /// Initialise both levels from a whole energy signal
    ///
    /// # Arguments
    /// * `energy` - Emphasized QRS energy
    /// * `segment_len` - Learning segment length in samples (one second)
    /// * `ratio` - Threshold position between noise and signal level
    pub fn learn(energy: &[f64], segment_len: usize, ratio: f64) -> Self {
        let segment_maxima: Vec<f64> = energy
            .chunks(segment_len.max(1))
            .map(|chunk| chunk.iter().copied().fold(f64::MIN, f64::max))
            .collect();

        Self::new(median(&segment_maxima), median(energy), ratio)
    }

    /// Current detection threshold
    pub fn level(&self) -> f64 {
        self.noise_level + self.ratio * (self.signal_level - self.noise_level)
    }

    pub fn signal_level(&self) -> f64 {
        self.signal_level
    }

    pub fn noise_level(&self) -> f64 {
        self.noise_level
    }

    pub fn absorb_signal(&mut self, peak: f64) {
        self.signal_level = PEAK_WEIGHT * peak + (1.0 - PEAK_WEIGHT) * self.signal_level;
    }

    pub fn absorb_noise(&mut self, peak: f64) {
        self.noise_level = PEAK_WEIGHT * peak + (1.0 - PEAK_WEIGHT) * self.noise_level;
    }

    pub fn absorb_searchback(&mut self, peak: f64) {
        self.signal_level = SEARCHBACK_WEIGHT * peak + (1.0 - SEARCHBACK_WEIGHT) * self.signal_level;
    }
}

/// Median of a slice (mean of the middle pair for even lengths, 0 when empty)
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
