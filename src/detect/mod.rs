mod backend;
mod backends;
pub mod normalize;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ReplayBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use normalize::{
    describe_detections, normalize, Detection, DistanceBucket, HorizontalBucket,
    CONFIDENCE_THRESHOLD, EMPTY_SCENE_DESCRIPTION,
};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{DetectorOutput, RawDetection};
