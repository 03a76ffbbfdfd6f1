// Pipeline processing: validation and tier transformation

pub mod quality_gate;
pub mod transform;
