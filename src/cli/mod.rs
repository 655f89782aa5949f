mod commands;
mod handlers;

pub use commands::{Cli, Commands, EffectArgs};
pub use handlers::{
    handle_add, handle_check, handle_clear, handle_clear_overrides, handle_delete, handle_hide,
    handle_init, handle_list, handle_override, handle_restore, handle_serve, handle_unoverride,
    handle_update,
};
