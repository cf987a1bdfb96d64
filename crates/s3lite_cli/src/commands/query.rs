//! Query command implementation.

use s3lite_core::{Arg, Database, Row, Value};

/// Runs a query and prints its rows.
pub async fn run(
    db: &Database,
    sql: &str,
    params: &[String],
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<Arg> = params.iter().map(|p| Arg::Value(parse_param(p))).collect();
    let rows = db.all(sql, args).await?;

    match format {
        "json" => {
            for row in &rows {
                println!("{}", serde_json::to_string(row)?);
            }
        }
        "text" => print!("{}", render_table(&rows)),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

/// Reads a command-line parameter as an integer, a real, or text.
fn parse_param(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        Value::Integer(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        Value::Real(v)
    } else if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else {
        Value::Text(raw.to_string())
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Blob(v) => format!("<{} bytes>", v.len()),
    }
}

fn render_table(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return "(no rows)\n".to_string();
    };

    let header: Vec<String> = first.column_names().map(str::to_string).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.values().map(display).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(String::len).collect();
    for cells in &body {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect();
        format!("{}\n", padded.join(" | ").trim_end())
    };

    let mut out = line(&header);
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    out.push_str(&format!("{}\n", rule.join("-+-")));
    for cells in &body {
        out.push_str(&line(cells));
    }
    out.push_str(&format!("({} rows)\n", rows.len()));
    out
}
