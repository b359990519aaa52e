pub mod messaging;
pub mod process;
pub mod state;

pub use messaging::*;
pub use process::*;
pub use state::*;
