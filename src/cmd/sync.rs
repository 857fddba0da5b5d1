use pygr::ops::{self, OpContext, OpError};

pub fn run(ctx: &OpContext) -> Result<(), OpError> {
    let entries = ops::sync::sync_from_current(ctx)?;
    println!("synced {} entries from current generation", entries.len());
    Ok(())
}
