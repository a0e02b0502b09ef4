use std::fs;

fn main() -> anyhow::Result<()> {
    let doc = tenant_authz::docs::build_openapi()?;
    let s = serde_json::to_string_pretty(&doc)?;
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/tenant-authz-openapi.json".to_string());
    fs::write(&path, s)?;
    println!("wrote {}", path);
    Ok(())
}
