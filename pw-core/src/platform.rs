//! Where PulseWatch keeps its files on this machine.
//!
//! | | config | data (logs) |
//! |---|---|---|
//! | Linux | `~/.config/PulseWatch` | `~/.local/share/PulseWatch` |
//! | macOS | `~/Library/Application Support/PulseWatch` | same |
//! | Windows | `%APPDATA%\PulseWatch` | same |

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{PulseError, PulseResult};

pub fn config_dir() -> PulseResult<PathBuf> {
    app_dir(dirs::config_dir(), "config")
}

pub fn data_dir() -> PulseResult<PathBuf> {
    app_dir(dirs::data_dir(), "data")
}

fn app_dir(base: Option<PathBuf>, kind: &str) -> PulseResult<PathBuf> {
    base.map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| PulseError::Config(format!("no {kind} directory for this user")))
}
