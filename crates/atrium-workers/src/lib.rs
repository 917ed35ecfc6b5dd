mod framework;
mod hvac;
mod metrics;
mod network;
mod parse;
mod power;
mod security;

pub use framework::{Specialist, Worker};
pub use hvac::HvacSpecialist;
pub use metrics::WorkerMetrics;
pub use network::NetworkSpecialist;
pub use parse::{decode_model_output, normalize_confidence, ParseOutcome};
pub use power::PowerSpecialist;
pub use security::SecuritySpecialist;
