//! Video source implementations

mod frame_index_source;

pub use frame_index_source::FrameIndexSource;
