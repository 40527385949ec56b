pub mod error;
pub mod types;
pub mod value;

pub use error::SonaScriptError;
pub use types::*;
pub use value::*;
