pub mod citations;
pub mod domain;
pub mod error;
pub mod prompt;
pub mod protocol;
pub mod response;
pub mod sections;
pub mod stream;
