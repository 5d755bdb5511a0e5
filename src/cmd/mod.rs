//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `init`    | `Init`           |
//! | `openapi` | `Openapi`        |

pub mod init;
pub mod openapi;
pub mod serve;

pub use init::cmd_init;
pub use openapi::cmd_openapi;
pub use serve::{ServeOverrides, cmd_serve};
