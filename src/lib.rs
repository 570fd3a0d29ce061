mod client;
mod config;
mod country;
mod error;
mod eval;
mod flag;
mod location;
mod rule;
mod sdk;
mod settings;
mod store;
mod test_common;

pub use client::*;
pub use config::*;
pub use country::*;
pub use error::*;
pub use eval::*;
pub use flag::*;
pub use location::*;
pub use rule::*;
pub use sdk::*;
pub use settings::*;
pub use store::*;
