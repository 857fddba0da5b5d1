use pygr::ops::{self, OpContext, OpError};

pub async fn run(ctx: &OpContext) -> Result<(), OpError> {
    let report = ops::sync::apply(ctx).await?;
    println!(
        "applied {} entries, generation {}",
        report.built.len() + report.system.len(),
        report.generation
    );
    Ok(())
}
