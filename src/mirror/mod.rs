pub mod actor;
pub mod state;

pub use actor::{spawn, MirrorHandle};
