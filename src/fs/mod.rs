//! Storage the orchestrator stages files in: HDFS through the `hadoop fs`
//! shell, or an S3-compatible bucket for the cloud backend.

pub mod hdfs;
pub mod s3;

pub use hdfs::{HadoopFs, HdfsFile};
pub use s3::ObjectStore;
