use pygr::core::builder::Provenance;
use pygr::ops::{self, OpContext, OpError};

pub async fn run(ctx: &OpContext, packages: &[String]) -> Result<(), OpError> {
    let report = ops::upgrade::upgrade(ctx, packages).await?;

    let mut changed = 0;
    for built in &report.built {
        if built.provenance != Provenance::Reused {
            changed += 1;
            let version = built
                .version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "src".into());
            println!("upgraded {} to {version}", built.name);
        }
    }
    if changed == 0 {
        println!("everything up to date");
    }
    println!("generation {}", report.generation);
    Ok(())
}
