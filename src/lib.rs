//! Isolate a C++ compiler or analyzer defect into a private workspace, build
//! an interestingness test for it, and drive an external reducer to a fixed
//! point.
pub mod checks;
pub mod cli;
pub mod compile_db;
pub mod config;
pub mod driver;
pub mod error;
pub mod interesting;
pub mod preprocess;
pub mod process;
pub mod reduce;
pub mod run;
pub mod util;
pub mod workspace;

pub use error::{ReduceError, Result};
