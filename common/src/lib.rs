pub mod error;
pub mod llm;
pub mod types;
pub mod utils;
