//! External scoring service integration.

pub mod scoring_client {
    pub use crate::scoring_client::*;
}

pub mod circuit_breaker {
    pub use crate::circuit_breaker::*;
}

pub mod score_cache {
    pub use crate::score_cache::*;
}
