pub mod common;

mod access_gate;
mod request_headers;
