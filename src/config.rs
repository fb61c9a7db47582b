//! Run configuration shared by the engine, the model and the CLI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::seeding::SeedStrategy;
use crate::{KMeansError, Result};

/// Assignment strategy used during the iterative phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Exhaustive Lloyd iterations: every point is compared to every center.
    Lloyd,
    /// Hamerly (2010): one upper and one lower bound per point.
    #[default]
    Hamerly,
    /// Elkan (2003): one upper bound and `k` lower bounds per point.
    Elkan,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Lloyd => write!(f, "lloyd"),
            Algorithm::Hamerly => write!(f, "hamerly"),
            Algorithm::Elkan => write!(f, "elkan"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lloyd" | "naive" => Ok(Self::Lloyd),
            "hamerly" => Ok(Self::Hamerly),
            "elkan" => Ok(Self::Elkan),
            other => Err(KMeansError::InvalidConfig(format!(
                "unsupported algorithm '{other}'"
            ))),
        }
    }
}

/// How the partitioned phases are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Parallelism {
    /// Run every phase on the calling thread.
    Serial,
    /// Use rayon's global thread pool.
    #[default]
    Global,
    /// Build a dedicated pool with this many worker threads for the run.
    Threads(usize),
}

impl Parallelism {
    pub fn is_parallel(&self) -> bool {
        !matches!(self, Parallelism::Serial)
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Serial => write!(f, "serial"),
            Parallelism::Global => write!(f, "global"),
            Parallelism::Threads(n) => write!(f, "threads={n}"),
        }
    }
}

impl FromStr for Parallelism {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim().to_lowercase();
        match raw.as_str() {
            "serial" => return Ok(Self::Serial),
            "global" | "parallel" => return Ok(Self::Global),
            _ => {}
        }
        let count = raw.strip_prefix("threads=").unwrap_or(&raw);
        count.parse::<usize>().map(Self::Threads).map_err(|_| {
            KMeansError::InvalidConfig(format!("unsupported parallelism '{raw}'"))
        })
    }
}

/// Configurable knobs for a clustering run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KMeansConfig {
    /// Number of centers to optimise.
    pub k: usize,
    /// Maximum number of assignment/update iterations.
    pub max_iter: usize,
    /// Seeding policy used when the caller does not supply centers.
    pub init: SeedStrategy,
    /// Assignment strategy.
    pub algorithm: Algorithm,
    /// Scheduling of the partitioned phases.
    pub parallelism: Parallelism,
    /// Seed for the random source used by seeding.
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_iter: 300,
            init: SeedStrategy::default(),
            algorithm: Algorithm::default(),
            parallelism: Parallelism::default(),
            seed: 42,
        }
    }
}

impl KMeansConfig {
    /// Validate configuration parameters for a specific dataset.
    pub fn validate(&self, data: &Dataset) -> Result<()> {
        if data.is_empty() {
            return Err(KMeansError::InvalidConfig(
                "dataset must contain at least one point".into(),
            ));
        }
        if self.k == 0 {
            return Err(KMeansError::InvalidConfig(
                "k must be greater than zero".into(),
            ));
        }
        if data.len() < self.k {
            return Err(KMeansError::InvalidConfig(format!(
                "dataset has {} points but k = {}; add more data or decrease k",
                data.len(),
                self.k
            )));
        }
        if self.max_iter == 0 {
            return Err(KMeansError::InvalidConfig(
                "max_iter must be greater than zero".into(),
            ));
        }
        if let Parallelism::Threads(0) = self.parallelism {
            return Err(KMeansError::InvalidConfig(
                "parallelism must request at least one thread".into(),
            ));
        }
        Ok(())
    }
}
