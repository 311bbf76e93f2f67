// Pairwise image alignment: ECC estimation and the matching warp
pub mod ecc;
pub mod error;
pub mod warp;

pub use ecc::*;
pub use error::*;
pub use warp::*;
