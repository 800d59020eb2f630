pub mod config;
pub mod handler;
pub mod login;
pub mod reactor;
pub mod router;
pub mod store;


pub use config::AuthConfig;
pub use handler::SessionCommandHandler;
pub use login::LoginService;
pub use reactor::UserActionReactor;
pub use router::create_router;
pub use store::SessionStore;
