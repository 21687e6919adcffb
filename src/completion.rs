#![forbid(unsafe_code)]

// Prompt construction and the outbound completion call.
pub mod forwarder;
pub mod openai;
