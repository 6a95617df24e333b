pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::fields;
pub use routes::state::AppState;
