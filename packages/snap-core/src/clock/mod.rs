//! Clock synchronization: the rolling-median accumulator shared by the time
//! estimator and the jitter buffer, and the time estimator itself.

pub mod double_buffer;
pub mod estimator;

pub use double_buffer::DoubleBuffer;
pub use estimator::TimeEstimator;
