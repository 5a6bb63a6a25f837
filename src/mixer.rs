/*!
 * Combined dataset mixer: weighted sampling across streaming datasets
 *
 * Each draw picks a source dataset with a PRNG seeded from
 * `(seed, global_step)`, so the source sequence is reproducible
 * independent of how fast each source yields. Sources keep independent
 * cursors; an exhausted source either wraps into its next epoch
 * (default) or stops the combined stream.
 */

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strata_core_format::Sample;

use crate::assign::mix;
use crate::error::{Result, StrataError};
use crate::reader::{StreamIter, StreamingDataset};

/// What happens when one source runs out of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionMode {
    /// Restart the exhausted source at its next epoch
    #[default]
    Wrap,
    /// End the combined stream at the first exhausted source
    Stop,
}

/// Weighted combination of streaming datasets
pub struct CombinedDataset {
    sources: Vec<StreamingDataset>,
    /// Normalized weights, same order as `sources`
    weights: Vec<f64>,
    seed: u64,
    mode: ExhaustionMode,
}

impl CombinedDataset {
    /// Combine datasets with per-source weights (normalized internally).
    ///
    /// # Errors
    ///
    /// `Config` when no sources are given or a weight is not positive.
    pub fn new(sources: Vec<(StreamingDataset, f64)>, seed: u64) -> Result<Self> {
        if sources.is_empty() {
            return Err(StrataError::Config(
                "combined dataset needs at least one source".to_string(),
            ));
        }
        if sources.iter().any(|(_, w)| !w.is_finite() || *w <= 0.0) {
            return Err(StrataError::Config(
                "combined dataset weights must be positive".to_string(),
            ));
        }
        let total: f64 = sources.iter().map(|(_, w)| w).sum();
        let (sources, weights) = sources
            .into_iter()
            .map(|(ds, w)| (ds, w / total))
            .unzip();
        Ok(Self {
            sources,
            weights,
            seed,
            mode: ExhaustionMode::Wrap,
        })
    }

    /// Select the exhaustion behavior
    pub fn with_mode(mut self, mode: ExhaustionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Normalized weights
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Iterate the combined stream
    pub fn iter(&self) -> Result<CombinedIter<'_>> {
        let cursors = self
            .sources
            .iter()
            .map(|ds| {
                Ok(SourceCursor {
                    dataset: ds,
                    iter: ds.iter_epoch(0)?,
                    epoch: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CombinedIter {
            combined: self,
            cursors,
            step: 0,
            stopped: false,
        })
    }
}

struct SourceCursor<'a> {
    dataset: &'a StreamingDataset,
    iter: StreamIter<'a>,
    epoch: u64,
}

/// Iterator over the combined stream, yielding `(source index, sample)`
pub struct CombinedIter<'a> {
    combined: &'a CombinedDataset,
    cursors: Vec<SourceCursor<'a>>,
    step: u64,
    stopped: bool,
}

impl CombinedIter<'_> {
    /// The number of draws made so far
    pub fn step(&self) -> u64 {
        self.step
    }

    fn next_inner(&mut self) -> Result<Option<(usize, Sample)>> {
        if self.stopped {
            return Ok(None);
        }
        let source_idx = draw_source(self.combined.seed, self.step, &self.combined.weights);
        self.step += 1;

        let cursor = &mut self.cursors[source_idx];
        let sample = match cursor.iter.next() {
            Some(result) => result?,
            None => match self.combined.mode {
                ExhaustionMode::Stop => {
                    self.stopped = true;
                    return Ok(None);
                }
                ExhaustionMode::Wrap => {
                    cursor.epoch += 1;
                    cursor.iter = cursor.dataset.iter_epoch(cursor.epoch)?;
                    match cursor.iter.next() {
                        Some(result) => result?,
                        None => {
                            // An empty source cannot wrap into data.
                            self.stopped = true;
                            return Ok(None);
                        }
                    }
                }
            },
        };
        Ok(Some((source_idx, sample)))
    }
}

impl Iterator for CombinedIter<'_> {
    type Item = Result<(usize, Sample)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_inner().transpose()
    }
}

/// Pick a source index for `step`: reproducible weighted draw seeded
/// from `(seed, step)`.
pub fn draw_source(seed: u64, step: u64, weights: &[f64]) -> usize {
    let mut rng = StdRng::seed_from_u64(mix(&[seed, step]));
    let draw: f64 = rng.random();
    let mut cumulative = 0.0;
    for (i, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if draw < cumulative {
            return i;
        }
    }
    weights.len() - 1
}
