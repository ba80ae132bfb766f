//! System clipboard access, used by `Instance::pause` to copy the
//! branch name for the operator to paste elsewhere.

use anyhow::{Context, Result};

pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("could not access system clipboard")?;
    clipboard
        .set_text(text.to_string())
        .context("could not write to system clipboard")?;
    Ok(())
}
