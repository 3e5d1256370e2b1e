// Domain layer: data types and ports shared by the pipeline and the adapters.

pub mod model;
pub mod ports;
