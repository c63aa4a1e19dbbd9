//! Temporal accumulation of exposure samples into phase images.
//!
//! Each phase offset owns two buffers. A step writes into the buffer that was
//! not written last, reading the other one as the running sum, so no buffer is
//! ever read and written in the same step.

use crate::energy::PHASES;
use crate::error::{Result, SimError};
use crate::grid::{Grid, Texel, CH_A, CH_B, CH_DEPTH, CH_ENERGY};

#[derive(Debug, Clone)]
pub struct PhaseAccumulator {
    buffers: [[Grid<Texel>; 2]; PHASES],
    last_written: [Option<usize>; PHASES],
    /// Next sample index each phase accepts.
    expected: [usize; PHASES],
}

impl PhaseAccumulator {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            buffers: std::array::from_fn(|_| [Grid::new(width, height), Grid::new(width, height)]),
            last_written: [None; PHASES],
            expected: [0; PHASES],
        }
    }

    pub fn width(&self) -> usize {
        self.buffers[0][0].width()
    }

    pub fn height(&self) -> usize {
        self.buffers[0][0].height()
    }

    /// Reallocate every buffer and forget all progress.
    pub fn resize(&mut self, width: usize, height: usize) {
        for pair in &mut self.buffers {
            for grid in pair {
                grid.resize(width, height);
            }
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        self.last_written = [None; PHASES];
        self.expected = [0; PHASES];
    }

    /// Add sample `sample` of phase `phase`. Sample 0 starts a new sum.
    pub fn accumulate(&mut self, phase: usize, sample: usize, reduced: &Grid<Texel>) -> Result<()> {
        if phase >= PHASES {
            return Err(SimError::OutOfOrder {
                phase,
                expected: 0,
                got: sample,
            });
        }
        let expected = if sample == 0 { 0 } else { self.expected[phase] };
        if sample != expected {
            return Err(SimError::OutOfOrder {
                phase,
                expected,
                got: sample,
            });
        }
        if !reduced.same_size(&self.buffers[phase][0]) {
            return Err(SimError::InvalidParams(format!(
                "phase {} sample is {}x{}, accumulator is {}x{}",
                phase,
                reduced.width(),
                reduced.height(),
                self.width(),
                self.height()
            )));
        }

        let write = match self.last_written[phase] {
            Some(slot) => 1 - slot,
            None => 0,
        };
        let [first, second] = &mut self.buffers[phase];
        let (dst, prev) = if write == 0 {
            (first, &*second)
        } else {
            (second, &*first)
        };

        if sample == 0 {
            dst.as_mut_slice().copy_from_slice(reduced.as_slice());
        } else {
            for ((d, p), s) in dst
                .as_mut_slice()
                .iter_mut()
                .zip(prev.as_slice())
                .zip(reduced.as_slice())
            {
                d[CH_A] = p[CH_A] + s[CH_A];
                d[CH_B] = p[CH_B] + s[CH_B];
                d[CH_ENERGY] = p[CH_ENERGY] + s[CH_ENERGY];
                d[CH_DEPTH] = s[CH_DEPTH];
            }
        }

        self.last_written[phase] = Some(write);
        self.expected[phase] = sample + 1;
        Ok(())
    }

    /// The phase image after `samples` steps.
    pub fn completed(&self, phase: usize, samples: usize) -> Result<&Grid<Texel>> {
        match self.last_written.get(phase).copied().flatten() {
            Some(slot) if self.expected[phase] == samples => Ok(&self.buffers[phase][slot]),
            _ => Err(SimError::PhaseIncomplete(phase)),
        }
    }

    /// All four completed phase images in phase order.
    pub fn completed_all(&self, samples: usize) -> Result<[&Grid<Texel>; PHASES]> {
        Ok([
            self.completed(0, samples)?,
            self.completed(1, samples)?,
            self.completed(2, samples)?,
            self.completed(3, samples)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f32, depth: f32) -> Grid<Texel> {
        let mut g = Grid::new(2, 2);
        g.fill([v, 2.0 * v, depth, 3.0 * v]);
        g
    }

    #[test]
    fn test_sums_samples_and_keeps_latest_depth() {
        let mut acc = PhaseAccumulator::new(2, 2);
        acc.accumulate(1, 0, &sample(1.0, 0.5)).unwrap();
        acc.accumulate(1, 1, &sample(2.0, 0.6)).unwrap();
        acc.accumulate(1, 2, &sample(4.0, 0.7)).unwrap();
        let img = acc.completed(1, 3).unwrap();
        assert_eq!(*img.get(1, 1), [7.0, 14.0, 0.7, 21.0]);
    }

    #[test]
    fn test_single_sample_is_copied() {
        let mut acc = PhaseAccumulator::new(2, 2);
        acc.accumulate(0, 0, &sample(1.5, 0.3)).unwrap();
        assert_eq!(*acc.completed(0, 1).unwrap().get(0, 0), [1.5, 3.0, 0.3, 4.5]);
    }

    #[test]
    fn test_new_frame_restarts_sum() {
        let mut acc = PhaseAccumulator::new(2, 2);
        acc.accumulate(2, 0, &sample(1.0, 0.5)).unwrap();
        acc.accumulate(2, 1, &sample(1.0, 0.5)).unwrap();
        acc.accumulate(2, 0, &sample(5.0, 0.9)).unwrap();
        acc.accumulate(2, 1, &sample(1.0, 0.8)).unwrap();
        assert_eq!(acc.completed(2, 2).unwrap().get(0, 0)[CH_A], 6.0);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut acc = PhaseAccumulator::new(2, 2);
        let err = acc.accumulate(0, 1, &sample(1.0, 0.5)).unwrap_err();
        assert!(matches!(
            err,
            SimError::OutOfOrder {
                phase: 0,
                expected: 0,
                got: 1
            }
        ));
        acc.accumulate(0, 0, &sample(1.0, 0.5)).unwrap();
        assert!(acc.accumulate(0, 2, &sample(1.0, 0.5)).is_err());
    }

    #[test]
    fn test_incomplete_phase_is_error() {
        let mut acc = PhaseAccumulator::new(2, 2);
        assert!(matches!(acc.completed(3, 1), Err(SimError::PhaseIncomplete(3))));
        acc.accumulate(3, 0, &sample(1.0, 0.5)).unwrap();
        assert!(acc.completed(3, 2).is_err());
        assert!(acc.completed(3, 1).is_ok());
        assert!(acc.completed_all(1).is_err());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut acc = PhaseAccumulator::new(3, 3);
        assert!(acc.accumulate(0, 0, &sample(1.0, 0.5)).is_err());
    }
}
