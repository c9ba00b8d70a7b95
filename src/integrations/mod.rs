//! Remote lookup services.

pub mod lookup_client {
    pub use crate::lookup_client::*;
}

pub mod services {
    pub use crate::services::*;
}
