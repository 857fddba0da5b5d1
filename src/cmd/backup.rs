use pygr::ops::{self, OpContext, OpError};

pub fn run(ctx: &OpContext, label: Option<&str>) -> Result<(), OpError> {
    let dir = ops::transfer::backup(ctx, label)?;
    println!("backup written to {}", dir.display());
    Ok(())
}
