use pygr::ops::{OpContext, OpError};

pub fn run(ctx: &OpContext) -> Result<(), OpError> {
    println!("root:       {}", ctx.layout.root().display());
    match ctx.profiles.current() {
        Some(n) => println!("generation: {n}"),
        None => println!("generation: none"),
    }
    if let Some(n) = ctx.profiles.previous() {
        println!("previous:   {n}");
    }
    println!("artifacts:  {}", ctx.store.enumerate()?.len());
    println!("entries:    {}", ctx.state.read()?.len());
    println!("repos:      {}", ctx.db.list_repos()?.len());
    println!("sandbox:    {}", ctx.policy.marker());
    match &ctx.cache {
        Some(_) => println!("cache:      configured"),
        None => println!("cache:      none"),
    }
    Ok(())
}
