pub mod bridges;
pub mod config;
pub mod directory;
pub mod error;
pub mod gate;
pub mod invalidation;
pub mod middleware;
pub mod router;
pub mod session;
pub mod token;

#[cfg(test)]
mod tests;

pub use bridges::Bridges;
pub use config::GatewayConfig;
pub use gate::{AuthGate, AuthUser, Rejection};
pub use invalidation::ActionListener;
pub use router::{create_router, AppState};
pub use session::{SessionCache, SessionEntry};
pub use token::SessionTokens;
