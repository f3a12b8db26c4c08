use crate::context::AppContext;
use anyhow::{anyhow, Result};
use log::info;
use serde_json::{json, Map, Value};

pub fn run(app: &AppContext, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(anyhow!("at least one item id is required"));
    }
    let service = app.forecast_service()?;
    let predictions = service.predict(ids)?;
    info!("Returning forecasts for {} item(s)", predictions.len());

    let mut body = Map::new();
    for (id, values) in predictions {
        body.insert(id, json!(values));
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(body))?);
    Ok(())
}
