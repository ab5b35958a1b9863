mod calendar;
mod email;
mod provider;
mod tool;

pub use calendar::*;
pub use email::*;
pub use provider::*;
pub use tool::*;
