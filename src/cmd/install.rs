use pygr::core::builder::Provenance;
use pygr::ops::{self, OpContext, OpError};

pub async fn run(ctx: &OpContext, packages: &[String], from_github: bool) -> Result<(), OpError> {
    let report = ops::install::install(ctx, packages, from_github).await?;

    for (pm, name) in &report.system {
        println!("{name} (system:{pm})");
    }
    for built in &report.built {
        let version = built
            .version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "src".into());
        let how = match built.provenance {
            Provenance::Built => "built",
            Provenance::Cached => "from cache",
            Provenance::Reused => "already in store",
        };
        println!("{} {version} ({how}) {}", built.name, &built.key[..12]);
    }
    println!("generation {}", report.generation);
    Ok(())
}
