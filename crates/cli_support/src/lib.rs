pub mod common;

pub use common::{DatasetOutputArgs, MetadataInputArgs, RawStorageArgs, RunArgs};
