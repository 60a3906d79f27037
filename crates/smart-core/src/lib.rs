pub mod audit;
pub mod bus;
pub mod cmdlet;
pub mod error;
pub mod metrics;
pub mod transport;

pub use error::{ParseError, Result, SmartError};

pub fn init() {
    tracing::info!("Core library initialized");
}
