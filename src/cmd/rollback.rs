use pygr::ops::{self, OpContext, OpError};

pub fn run(ctx: &OpContext) -> Result<(), OpError> {
    let restored = ops::sync::rollback(ctx)?;
    println!("rolled back to generation {restored}");
    Ok(())
}
