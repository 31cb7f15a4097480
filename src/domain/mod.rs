// Domain layer: patient/dataset models and the ports (traits) the pipeline is built on.

pub mod model;
pub mod ports;
