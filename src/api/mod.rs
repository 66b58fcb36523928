// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod coordinator {
    pub use crate::coordinator::*;
}
