use std::path::Path;

use pygr::ops::{self, OpContext, OpError};

pub fn run(ctx: &OpContext, file: &Path) -> Result<(), OpError> {
    let content = std::fs::read_to_string(file)?;
    let count = ops::transfer::import(ctx, &content)?;
    println!("imported {count} entries; run 'pygr apply' to install them");
    Ok(())
}
