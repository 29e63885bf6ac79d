mod app;
mod middleware;
mod state;

pub use app::{create_app, create_app_with};
pub use middleware::{admission_middleware, api_key_auth};
pub use state::AppState;
