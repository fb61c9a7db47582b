//! Parallel k-means clustering with triangle-inequality pruning.
//!
//! The crate implements the Elkan/Hamerly family of accelerated k-means
//! algorithms next to the plain Lloyd iteration they are measured against.
//! Every strategy shares one seeding layer, one center update engine and one
//! orchestrator, so the pruned variants reach exactly the same assignment as
//! the exhaustive baseline while computing far fewer distances.
//!
//! ```no_run
//! use triangle_kmeans::{ClusterEngine, Dataset, Euclidean, KMeansConfig};
//! use ndarray::array;
//!
//! let data = Dataset::new(array![[0.0, 0.0], [0.1, 0.0], [9.0, 9.0], [9.1, 9.0]]);
//! let config = KMeansConfig { k: 2, ..KMeansConfig::default() };
//! let outcome = ClusterEngine::new(config, Euclidean::default())
//!     .cluster(&data, None)
//!     .expect("clustering succeeds");
//! assert_eq!(outcome.assignments.len(), 4);
//! ```

use thiserror::Error;

pub mod bounds;
pub mod config;
pub mod data;
pub mod distance;
pub mod engine;
pub mod model;
pub mod seeding;
pub mod update;

pub use bounds::BoundStatus;
pub use config::{Algorithm, KMeansConfig, Parallelism};
pub use data::{generate_clustered_points, generate_points, DataLoader, DataMatrix, Dataset};
pub use distance::{AccelerationCache, Chebyshev, DistanceMetric, Euclidean, Manhattan};
pub use engine::{cluster, ClusterEngine, ClusterOutcome, KMeansRun, PruningStats, Termination};
pub use model::KMeansModel;
pub use seeding::{SeedSelector, SeedStrategy};
pub use update::{CenterMovement, CenterUpdateEngine};

/// Error type used by operations in this crate.
#[derive(Debug, Error)]
pub enum KMeansError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, KMeansError>;
