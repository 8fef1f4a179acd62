pub mod models;
pub mod recovery;
pub mod request;
pub mod response;

pub use models::*;
pub use request::build_google_request;
pub use response::build_client_response;
