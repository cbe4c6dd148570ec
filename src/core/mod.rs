//! Core flood mapping stages

pub mod speckle_filter;
pub mod change_detection;
pub mod masking;
pub mod connectivity;
pub mod vectorize;
pub mod enrichment;
pub mod pipeline;

// Re-export main types
pub use speckle_filter::{SpeckleFilter, SpeckleFilterParams};
pub use change_detection::{change_ratio, ChangeDetector};
pub use masking::{calculate_slope, MaskStack, MaskStackResult, TerrainLayer};
pub use connectivity::{bounded_cluster_size, ClusterFilter};
pub use vectorize::{Region, ScalePlan, VectorizeResult, Vectorizer};
pub use enrichment::{AreaFilter, CentroidRecord, FloodFeature, FloodOutput, PolygonFeature};
pub use pipeline::{FloodPipeline, FloodReport, PipelineStats};

use ndarray::{Array2, Zip};

/// Elementwise map over two equally shaped arrays
pub(crate) fn zip_map<A, B, R, F>(a: &Array2<A>, b: &Array2<B>, f: F) -> Array2<R>
where
    A: Sync,
    B: Sync,
    R: Send,
    F: Fn(&A, &B) -> R + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::from(a).and(b).par_map_collect(|x, y| f(x, y))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(a).and(b).map_collect(|x, y| f(x, y))
    }
}

/// Elementwise map that also receives the (row, col) index
pub(crate) fn map_indexed<A, R, F>(a: &Array2<A>, f: F) -> Array2<R>
where
    A: Sync,
    R: Send,
    F: Fn((usize, usize), &A) -> R + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::indexed(a).par_map_collect(|index, x| f(index, x))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::indexed(a).map_collect(|index, x| f(index, x))
    }
}
