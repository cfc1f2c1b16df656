pub mod config;
pub mod drill;
pub mod gate;

pub use gate::{Cancelled, Gate};
pub use tokio_util::sync::CancellationToken;
