mod health;
mod messages;
mod metrics_endpoint;
mod models;

pub use health::health;
pub use messages::messages;
pub use metrics_endpoint::metrics;
pub use models::models;
