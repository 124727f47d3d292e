pub mod common;
pub mod deploy;
pub mod devserver;
pub mod error;
pub mod logger;
pub mod repo_info;
pub mod sdk;
pub mod stage;

pub use deploy::handle_deploy;
pub use devserver::{handle_run, handle_start, handle_stop};
pub use repo_info::handle_gen_repo_info;
pub use sdk::{handle_install_component, handle_sdk_home};
pub use stage::handle_stage;
