//! A thin module wrapper that contains all the different files that each
//! handle one command.

mod argv_helpers;

mod help;
mod list;
mod loopback;
mod send;
mod tail;

pub use argv_helpers::*;
pub use help::*;
pub use list::*;
pub use loopback::*;
pub use send::*;
pub use tail::*;
