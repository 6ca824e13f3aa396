use std::io::BufRead;

use serde_json::{json, Value};

use crate::app::GalleryCard;
use crate::cli::OutputFormat;
use crate::error::AppError;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(target), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error in the appropriate format
pub fn output_error(output_format: &OutputFormat, error: &anyhow::Error) -> anyhow::Result<()> {
    let app_error = error.downcast_ref::<AppError>();

    match output_format {
        OutputFormat::Json => {
            let response = match app_error {
                Some(e) => e.to_json(),
                None => json!({ "success": false, "error": error.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", error);
        }
    }
    Ok(())
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(
    output_format: &OutputFormat,
    collection_name: &str,
    message: &str,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({
                "success": true,
                collection_name: []
            }))?);
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Gallery listing, one block per project in text mode
pub fn output_gallery(output_format: &OutputFormat, cards: &[GalleryCard]) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({
                "success": true,
                "projects": cards
            }))?);
        }
        OutputFormat::Text => {
            for card in cards {
                let data = &card.item.data;
                println!("{}  [{}]", data.title, card.item.id);
                println!("    {}", data.description);
                println!("    Tech:  {}", data.tech_list().join(", "));
                println!("    Link:  {}", data.link);
                println!("    Image: {}", card.image_url);
                if card.deletable {
                    println!("    (yours - can be deleted)");
                }
            }
        }
    }
    Ok(())
}

/// Password from the flag, `PORTFOLIO_PASSWORD`, or one line of stdin
pub fn resolve_password(flag: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = flag {
        return Ok(password);
    }
    if let Ok(password) = std::env::var("PORTFOLIO_PASSWORD") {
        return Ok(password);
    }

    eprint!("Password: ");
    read_password_line(std::io::stdin().lock())
}

fn read_password_line<R: BufRead>(mut reader: R) -> anyhow::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!(AppError::bad_request("A password is required"));
    }
    Ok(password)
}
