use crate::context::AppContext;
use anyhow::Result;

pub fn run(app: &AppContext, limit: usize, offset: usize) -> Result<()> {
    let service = app.forecast_service()?;
    let page = service.items(limit, offset)?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
