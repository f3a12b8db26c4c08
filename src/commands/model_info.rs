use crate::context::AppContext;
use anyhow::Result;

pub fn run(app: &AppContext) -> Result<()> {
    let service = app.forecast_service()?;
    let info = service.model_info()?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
