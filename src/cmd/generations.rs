use pygr::ops::{OpContext, OpError};

pub fn run(ctx: &OpContext) -> Result<(), OpError> {
    let current = ctx.profiles.current();
    let previous = ctx.profiles.previous();

    for number in ctx.profiles.list()? {
        let marker = if Some(number) == current {
            " (current)"
        } else if Some(number) == previous {
            " (previous)"
        } else {
            ""
        };
        match ctx.profiles.manifest(number) {
            Ok(manifest) => println!(
                "gen-{number}  {}  {} artifacts{marker}",
                manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
                manifest.artifacts.len()
            ),
            Err(_) => println!("gen-{number}  (manifest unreadable){marker}"),
        }
    }
    Ok(())
}
