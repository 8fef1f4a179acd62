pub mod models;
pub mod request;
pub mod response;

pub use models::*;
pub use request::build_openai_request;
pub use response::build_client_response;
