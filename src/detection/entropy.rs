//! Entropy calculation for spotting packed or encoded payloads.
//!
//! Plain source code sits well below 6.0 bits per byte. Long base64 or
//! compressed blobs embedded in a script push a buffer towards 8.0.

/// Entropy thresholds for classification.
pub const ENTROPY_NORMAL: f64 = 6.0;
pub const ENTROPY_HIGH: f64 = 7.0;
pub const ENTROPY_MAX: f64 = 8.0;

/// Calculate Shannon entropy of byte data.
///
/// Returns a value between 0.0 (no randomness) and 8.0 (maximum randomness for bytes).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut frequencies = [0u64; 256];
    for &byte in data {
        frequencies[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;

    for &count in &frequencies {
        if count > 0 {
            let probability = count as f64 / len;
            entropy -= probability * probability.log2();
        }
    }

    entropy
}

/// Entropy level bucket, used for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyLevel {
    Normal,
    Elevated,
    High,
}

impl EntropyLevel {
    pub fn from_value(entropy: f64) -> Self {
        if entropy >= ENTROPY_HIGH {
            EntropyLevel::High
        } else if entropy >= ENTROPY_NORMAL {
            EntropyLevel::Elevated
        } else {
            EntropyLevel::Normal
        }
    }
}

impl std::fmt::Display for EntropyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntropyLevel::Normal => write!(f, "normal"),
            EntropyLevel::Elevated => write!(f, "elevated"),
            EntropyLevel::High => write!(f, "high"),
        }
    }
}
