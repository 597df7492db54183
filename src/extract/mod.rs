pub mod fallback;
pub mod request;
pub mod response;

pub use request::extract_request;
pub use response::{extract_eventstream_response, extract_json_response, extract_streaming_response};
