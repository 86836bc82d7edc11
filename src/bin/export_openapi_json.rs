use course_server::api::openapi_json;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or("openapi.json".to_string());
    std::fs::write(&path, openapi_json()?)?;
    println!("OpenAPI document written to {}", path);
    Ok(())
}
