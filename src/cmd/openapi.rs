//! `benos openapi`: print the API description.

use anyhow::Result;

pub fn cmd_openapi() -> Result<()> {
    let doc = benos::openapi::document();
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
