pub mod types;

pub use types::{GuideError, PlaylistError, RelayError};
