pub mod defs;
pub mod state;
pub mod traits;

pub use defs::*;
pub use state::*;
pub use traits::*;
