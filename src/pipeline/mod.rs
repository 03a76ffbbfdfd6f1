// Data processing pipeline: quality gate, tier transformation, and storage

pub mod processing;
pub mod storage;
