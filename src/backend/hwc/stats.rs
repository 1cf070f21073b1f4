use std::fmt;

/// Composition counters of a display
///
/// The counters only ever grow. Activity over a period of time is obtained by
/// subtracting an older snapshot with [`Stats::minus`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Presented frames
    pub total_frames: u32,
    /// Pixels covered by all layers, summed over all validated frames
    pub total_pixops: u64,
    /// Pixels composited by the client, summed over all validated frames
    pub gpu_pixops: u64,
    /// Frames whose test commit was rejected
    pub failed_kms_validate: u32,
    /// Frames that could not be presented
    pub failed_kms_present: u32,
    /// Frames replaced by a single flattened client target
    pub frames_flattened: u32,
}

impl Stats {
    /// Activity between `earlier` and `self`
    pub fn minus(&self, earlier: &Stats) -> Stats {
        Stats {
            total_frames: self.total_frames.wrapping_sub(earlier.total_frames),
            total_pixops: self.total_pixops.wrapping_sub(earlier.total_pixops),
            gpu_pixops: self.gpu_pixops.wrapping_sub(earlier.gpu_pixops),
            failed_kms_validate: self.failed_kms_validate.wrapping_sub(earlier.failed_kms_validate),
            failed_kms_present: self.failed_kms_present.wrapping_sub(earlier.failed_kms_present),
            frames_flattened: self.frames_flattened.wrapping_sub(earlier.frames_flattened),
        }
    }

    /// Share of pixels scanned out by planes, between 0 and 1
    pub fn efficiency(&self) -> Option<f64> {
        if self.total_pixops == 0 {
            return None;
        }
        Some(1.0 - self.gpu_pixops as f64 / self.total_pixops as f64)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(efficiency) = self.efficiency() else {
            return write!(f, " No stats yet");
        };
        writeln!(f, " Total frames count: {}", self.total_frames)?;
        writeln!(f, " Failed to test commit frames: {}", self.failed_kms_validate)?;
        writeln!(f, " Failed to commit frames: {}", self.failed_kms_present)?;
        if self.failed_kms_present > 0 {
            writeln!(f, " !!! Internal failure, FIX it please")?;
        }
        writeln!(f, " Flattened frames: {}", self.frames_flattened)?;
        writeln!(
            f,
            " Pixel operations (free units) : [TOTAL: {} / GPU: {}]",
            self.total_pixops, self.gpu_pixops
        )?;
        write!(f, " Composition efficiency: {:.3}", efficiency)
    }
}
