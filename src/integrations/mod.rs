//! External service integrations.

pub mod search_gateway {
    pub use crate::search_gateway::*;
}

pub mod related {
    pub use crate::related::*;
}
