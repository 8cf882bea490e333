//! Print the session API's OpenAPI document, for client generation without a running server.

use trailhunt_back::services::documentation::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let document = ApiDoc::openapi().to_pretty_json()?;
    println!("{document}");
    Ok(())
}
