// Pipeline stages and shared errors/models
pub mod ingestion {
    pub use crate::ingestion::*;
}

pub mod validator {
    pub use crate::validator::*;
}

pub mod pairing {
    pub use crate::pairing::*;
}

pub mod classifier {
    pub use crate::classifier::*;
}

pub mod review {
    pub use crate::review::*;
}

pub mod export {
    pub use crate::export::*;
}

pub mod pipeline {
    pub use crate::pipeline::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
