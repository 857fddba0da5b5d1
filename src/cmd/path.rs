use pygr::ops::{OpContext, OpError};
use pygr::store::generations::CURRENT_LINK;

/// Print a shell assignment exposing the profile bin directory. The
/// `current` symlink is stable across generations, so the assignment never
/// goes stale.
pub fn run(ctx: &OpContext) -> Result<(), OpError> {
    let bin = ctx.layout.profiles_dir().join(CURRENT_LINK).join("bin");
    println!("export PATH=\"{}:$PATH\"", bin.display());
    Ok(())
}
