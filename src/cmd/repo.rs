use pygr::ops::{OpContext, OpError};

pub fn add(ctx: &OpContext, name: &str, url: &str) -> Result<(), OpError> {
    ctx.catalog().add_repo(name, url)?;
    println!("added repo {name} ({url})");
    Ok(())
}

pub fn list(ctx: &OpContext) -> Result<(), OpError> {
    for repo in ctx.catalog().list_repos()? {
        let refreshed = repo
            .last_refresh
            .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into());
        println!("{:<20} {}  (refreshed {refreshed})", repo.name, repo.url);
    }
    Ok(())
}
