//! Tools module

pub mod filesystem;
pub mod shell;

pub use filesystem::{read_file, write_file, FileToolError};

pub use shell::{
    is_interactive,
    CommandOutcome,
    CommandRunner,
    InterruptSignal,
    LiveSurface,
    LiveWindow,
    OutputLine,
    ShellConfig,
    Stream,
    INTERACTIVE_COMMANDS,
};
