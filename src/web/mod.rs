pub mod responses;
pub mod router;
pub mod state;

pub use responses::{ApiMessage, json_error};
pub use router::build_router;
pub use state::AppState;
