//! Shared utility functions for the supervisor.

use std::process::Command;

/// Windows: a visible service gets its own console, a hidden one none.
#[cfg(target_os = "windows")]
pub fn apply_window_flags(cmd: &mut Command, show_window: bool) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_CONSOLE: u32 = 0x00000010;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(if show_window { CREATE_NEW_CONSOLE } else { CREATE_NO_WINDOW })
}

/// Unix: there is no window to show; the child is moved into its own
/// process group so terminal signals aimed at the supervisor skip it.
#[cfg(unix)]
pub fn apply_window_flags(cmd: &mut Command, _show_window: bool) -> &mut Command {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0)
}

#[cfg(not(any(unix, target_os = "windows")))]
pub fn apply_window_flags(cmd: &mut Command, _show_window: bool) -> &mut Command {
    cmd
}
