#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use clusterlink_controller_core as core;
pub use clusterlink_controller_k8s_api as k8s;
pub use clusterlink_controller_k8s_index as index;
pub use clusterlink_controller_k8s_status as status;

mod args;
pub mod cli;
mod probe;

pub use self::{args::Args, cli::Ctl, probe::TcpProbe};
