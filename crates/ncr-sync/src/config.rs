//! Run configuration: batch size, inter-batch delay and chunking.
//!
//! Out-of-range values are clamped into their bounds with a warning rather
//! than rejected, so a typo on the command line still produces a safe run.

use std::time::Duration;

use tracing::warn;

use crate::error::{Result, SyncError};

pub const DEFAULT_BATCH_SIZE: u64 = 100;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 1000;
pub const DEFAULT_CHUNK_DIVISOR: usize = 10;
pub const DEFAULT_CHUNK_PAUSE_MS: u64 = 100;

/// Inclusive range a setting is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

impl Bounds {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Clamp `value`, warning when it had to move.
    pub fn clamp(&self, setting: &str, value: u64) -> u64 {
        let bounded = value.clamp(self.min, self.max);
        if bounded != value {
            warn!(
                setting,
                requested = value,
                applied = bounded,
                min = self.min,
                max = self.max,
                "value out of bounds, clamped"
            );
        }
        bounded
    }

    fn validate(&self, setting: &str) -> Result<()> {
        if self.min > self.max {
            return Err(SyncError::Config(format!(
                "{setting} bounds are inverted: {} > {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

pub const BATCH_SIZE_BOUNDS: Bounds = Bounds::new(1, 2000);
pub const BATCH_DELAY_BOUNDS: Bounds = Bounds::new(10, 600_000);

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    batch_size: usize,
    batch_delay: Duration,
    chunk_divisor: usize,
    chunk_pause: Duration,
    skip_errors: bool,
    dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE as usize,
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            chunk_divisor: DEFAULT_CHUNK_DIVISOR,
            chunk_pause: Duration::from_millis(DEFAULT_CHUNK_PAUSE_MS),
            skip_errors: false,
            dry_run: false,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    pub fn chunk_divisor(&self) -> usize {
        self.chunk_divisor
    }

    pub fn chunk_pause(&self) -> Duration {
        self.chunk_pause
    }

    pub fn skip_errors(&self) -> bool {
        self.skip_errors
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    batch_size: u64,
    batch_delay_ms: u64,
    chunk_divisor: usize,
    chunk_pause: Duration,
    skip_errors: bool,
    dry_run: bool,
    batch_size_bounds: Bounds,
    batch_delay_bounds: Bounds,
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            chunk_divisor: DEFAULT_CHUNK_DIVISOR,
            chunk_pause: Duration::from_millis(DEFAULT_CHUNK_PAUSE_MS),
            skip_errors: false,
            dry_run: false,
            batch_size_bounds: BATCH_SIZE_BOUNDS,
            batch_delay_bounds: BATCH_DELAY_BOUNDS,
        }
    }
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, size: u64) -> Self {
        self.batch_size = size;
        self
    }

    pub fn batch_delay_ms(mut self, ms: u64) -> Self {
        self.batch_delay_ms = ms;
        self
    }

    /// Number of chunks a failed batch is split into; 0 is raised to 1.
    pub fn chunk_divisor(mut self, divisor: usize) -> Self {
        self.chunk_divisor = divisor;
        self
    }

    /// Pause before each chunk attempt of a degraded batch.
    pub fn chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    pub fn skip_errors(mut self, skip: bool) -> Self {
        self.skip_errors = skip;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn batch_size_bounds(mut self, bounds: Bounds) -> Self {
        self.batch_size_bounds = bounds;
        self
    }

    pub fn batch_delay_bounds(mut self, bounds: Bounds) -> Self {
        self.batch_delay_bounds = bounds;
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        self.batch_size_bounds.validate("batch_size")?;
        self.batch_delay_bounds.validate("batch_delay")?;
        if self.batch_size_bounds.min == 0 {
            return Err(SyncError::Config(
                "batch_size lower bound must be at least 1".to_string(),
            ));
        }

        let batch_size = self.batch_size_bounds.clamp("batch_size", self.batch_size);
        let batch_delay = self
            .batch_delay_bounds
            .clamp("batch_delay", self.batch_delay_ms);
        let chunk_divisor = if self.chunk_divisor == 0 {
            warn!(setting = "chunk_divisor", requested = 0, applied = 1, "value out of bounds, clamped");
            1
        } else {
            self.chunk_divisor
        };

        Ok(PipelineConfig {
            batch_size: batch_size as usize,
            batch_delay: Duration::from_millis(batch_delay),
            chunk_divisor,
            chunk_pause: self.chunk_pause,
            skip_errors: self.skip_errors,
            dry_run: self.dry_run,
        })
    }
}
