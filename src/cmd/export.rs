use std::path::Path;

use pygr::ops::{self, OpContext, OpError};

pub fn run(ctx: &OpContext, file: Option<&Path>) -> Result<(), OpError> {
    let rendered = ops::transfer::export(ctx)?;
    match file {
        Some(path) => std::fs::write(path, rendered)?,
        None => print!("{rendered}"),
    }
    Ok(())
}
