use pygr::ops::{OpContext, OpError};
use pygr::registry::forge;

pub async fn run(ctx: &OpContext, query: &str, limit: usize) -> Result<(), OpError> {
    let hits = forge::search(&ctx.client, query, limit).await?;

    if hits.is_empty() {
        println!("no repositories matching '{query}'");
        return Ok(());
    }

    for hit in hits {
        println!(
            "{:<32} {:>7}* {}",
            hit.full_name,
            hit.stargazers_count,
            hit.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
