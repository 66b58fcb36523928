// Domain-layer modules and shared errors/models
pub mod resolver {
    pub use crate::resolver::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod services {
    pub use crate::services::*;
}

pub mod session {
    pub use crate::session::*;
}

pub mod errors {
    pub use crate::errors::*;
}
