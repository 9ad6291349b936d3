//! Interactive confirmation for destructive operations

use anyhow::Result;
use dialoguer::Confirm;

/// Ask the user to confirm a destructive step, defaulting to "no".
///
/// `assume_yes` (the `--yes` flag) skips the prompt entirely.
pub fn confirm_destructive(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    let result = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(result)
}
