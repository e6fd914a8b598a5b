//! Size ceiling for deliverable archives.

const BYTES_PER_MIB: f64 = 1_048_576.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliverable,
    Oversized,
}

/// Classifies compressed archives against a ceiling expressed in MiB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeGate {
    ceiling_mib: f64,
}

impl SizeGate {
    pub fn new(ceiling_mib: f64) -> Self {
        Self { ceiling_mib }
    }

    pub fn ceiling_mib(&self) -> f64 {
        self.ceiling_mib
    }

    /// Only sizes strictly above the ceiling are oversized.
    pub fn classify(&self, size_bytes: u64) -> Verdict {
        let size_mib = size_bytes as f64 / BYTES_PER_MIB;
        if size_mib > self.ceiling_mib {
            Verdict::Oversized
        } else {
            Verdict::Deliverable
        }
    }
}
