pub mod downsample;

pub use downsample::{DEFAULT_MAX_DOWNSAMPLE_ATTEMPTS, DownsamplePlan, plan_downsample};
