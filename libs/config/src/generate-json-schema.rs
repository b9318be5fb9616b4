use schemars::schema_for;
use shield_config::ShieldConfig;

const SCHEMA_PATH: &str = "libs/config/shield.schema.json";

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
  println!("generating JSON schema for the shield config file...");
  let schema = schema_for!(ShieldConfig);
  let as_string = serde_json::to_string_pretty(&schema)?;
  println!("writing to: {}", SCHEMA_PATH);
  std::fs::write(SCHEMA_PATH, as_string)?;
  println!("done");

  Ok(())
}
