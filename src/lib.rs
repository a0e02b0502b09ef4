pub mod app;
pub mod authz;
pub mod config;
pub mod docs;
pub mod errors;
pub mod kube;
pub mod lifecycle;
pub mod models;
pub mod oidc;
pub mod routes;
pub mod sync;
pub mod utils;

// Re-export commonly used items for tests
pub use app::{create_app, AppState};
pub use authz::PolicyStore;
pub use lifecycle::Runtime;
