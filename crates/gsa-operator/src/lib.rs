//! GCP service account operator: CRD installation and controller wiring

pub mod controller_runner;
pub mod crds;
