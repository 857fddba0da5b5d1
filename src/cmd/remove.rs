use pygr::ops::{self, OpContext, OpError};

pub fn run(ctx: &OpContext, packages: &[String]) -> Result<(), OpError> {
    let report = ops::remove::uninstall(ctx, packages)?;
    for entry in &report.removed {
        println!("removed {entry}");
    }
    println!("generation {}", report.generation);
    Ok(())
}
