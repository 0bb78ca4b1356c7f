//! 🧠欢迎光临🫐
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{
    DegenerateKind, ImgWriteVis, PseudoColorSlice, SliceAxis, SliceBatch, SliceBatchBuilder,
    SliceRange, Volume, VolumeError,
};

pub use crate::aggregate::{median, PredictionAggregator, PredictionTrace, RunningEstimate};
pub use crate::augment::{
    AffineTransform, AugmentError, Augmenter, Interpolator, PerturbSpec, PerturbationEnsemble,
    RandomAffine, Simulation, TransformType,
};
pub use crate::model::{
    FetchError, LoadError, ModelLoader, ModelSpec, PredictionError, SliceRegressor, WeightError,
    WeightFetcher, WeightStore,
};
pub use crate::preprocess::{
    IntensityTruncation, PreprocessError, PreprocessSpec, Preprocessed, Preprocessor,
};

pub use crate::cancel::CancelToken;
pub use crate::config::{weights_dir_from_env_or_home, EstimateOptions, EstimatorConfig};
pub use crate::consts::slices::{FIRST_SLICE, LAST_SLICE, NUM_SLICES};
pub use crate::consts::{TEMPLATE_SHAPE, TEMPLATE_SLICE_SHAPE};
pub use crate::error::{EstimateError, EstimateResult};
pub use crate::estimator::{BrainAgeEstimator, BrainAgeResult};
