//! Object store backends, the image codec, and the optimization pipeline.

pub mod batch;
pub mod codec;
pub mod local_store;
pub mod object_store;
pub mod processor;
pub mod s3_store;
