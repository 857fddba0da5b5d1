use pygr::ops::{OpContext, OpError};

pub fn run(ctx: &OpContext) -> Result<(), OpError> {
    for entry in ctx.state.read()? {
        println!("{entry}");
    }
    Ok(())
}
