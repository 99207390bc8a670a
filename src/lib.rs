pub mod aggregate;
pub mod error;
pub mod feed_db;
pub mod fixtures;
pub mod forecast;
pub mod params;
pub mod rating;
pub mod sampler;
pub mod season;
pub mod standings;
pub mod store;

pub use error::{ForecastError, Result};
pub use forecast::{LatestSimulation, RunReport, RunRequest, get_latest, run_simulation};
