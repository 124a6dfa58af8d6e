//! Table and JSON rendering shared by the commands.

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;

use crate::domain::health_report::HealthReport;

pub fn print_output<T: serde::Serialize>(format: &str, data: &T) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(data)?),
        _ => print_value(&serde_json::to_value(data)?, 0),
    }
    Ok(())
}

/// Recursive key-value rendering of any JSON value.
pub fn print_value(value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) => {
                        println!("{}{}:", pad, key);
                        print_value(val, indent + 1);
                    }
                    Value::Array(arr) if arr.is_empty() => println!("{}{}: []", pad, key),
                    Value::Array(arr) if arr.iter().all(|v| !v.is_object() && !v.is_array()) => {
                        let items: Vec<String> = arr.iter().map(format_scalar).collect();
                        println!("{}{}: {}", pad, key, items.join(", "));
                    }
                    Value::Array(_) => {
                        println!("{}{}:", pad, key);
                        print_value(val, indent + 1);
                    }
                    _ => println!("{}{}: {}", pad, key, format_scalar(val)),
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                if item.is_object() {
                    println!("{}[{}]:", pad, i);
                    print_value(item, indent + 1);
                } else {
                    println!("{}- {}", pad, format_scalar(item));
                }
            }
        }
        _ => println!("{}{}", pad, format_scalar(value)),
    }
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Findings in red, or a green all-clear.
pub fn print_report(report: &HealthReport) -> Result<()> {
    if report.is_empty() {
        println!("  {}", "ready for upgrade".green());
        return Ok(());
    }
    let value = serde_json::to_value(report)?;
    if let Value::Object(map) = value {
        for (key, finding) in map {
            match finding {
                Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                    println!("  {}: {}", key.red(), format_scalar(&finding))
                }
                other => {
                    println!("  {}:", key.red());
                    print_value(&other, 2);
                }
            }
        }
    }
    Ok(())
}
