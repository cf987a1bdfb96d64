//! Lock command implementation.

use s3lite_core::{now_millis, Database, LockStatus};
use serde::Serialize;

/// Lock status as printed by the CLI.
#[derive(Debug, Serialize)]
pub struct LockReport {
    /// Key of the lock object.
    pub lock_key: String,
    /// Whether a lock object exists.
    pub locked: bool,
    /// Lease id, if the body is a lease.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<String>,
    /// Lease expiry in ms since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<u64>,
    /// Whether the lease is still valid.
    pub valid: bool,
}

impl LockReport {
    fn new(lock_key: String, status: LockStatus) -> Self {
        match status {
            LockStatus::Unlocked => Self {
                lock_key,
                locked: false,
                lease_id: None,
                valid_to: None,
                valid: false,
            },
            LockStatus::Held { lease, valid } => Self {
                lock_key,
                locked: true,
                lease_id: lease.as_ref().map(|lease| lease.id.clone()),
                valid_to: lease.map(|lease| lease.valid_to),
                valid,
            },
        }
    }
}

/// Prints the state of the lock object.
pub async fn run(db: &Database, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let status = db.lock_status().await?;
    let report = LockReport::new(db.address().lock_key(), status);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print!("{}", render(&report, now_millis())),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn render(report: &LockReport, now: u64) -> String {
    if !report.locked {
        return format!("{}: unlocked\n", report.lock_key);
    }
    let mut out = format!("{}: locked\n", report.lock_key);
    match (&report.lease_id, report.valid_to) {
        (Some(id), Some(valid_to)) => {
            out.push_str(&format!("  Lease: {id}\n"));
            if report.valid {
                out.push_str(&format!(
                    "  Expires in: {} ms\n",
                    valid_to.saturating_sub(now)
                ));
            } else {
                out.push_str("  Expired\n");
            }
        }
        _ => out.push_str("  Body is not a lease\n"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3lite_core::Lease;

    #[test]
    fn unlocked_report() {
        let report = LockReport::new("db.lock".into(), LockStatus::Unlocked);
        assert_eq!(render(&report, 0), "db.lock: unlocked\n");
    }

    #[test]
    fn valid_lease_report() {
        let status = LockStatus::Held {
            lease: Some(Lease {
                id: "abc".into(),
                valid_to: 1_500,
            }),
            valid: true,
        };
        let report = LockReport::new("db.lock".into(), status);
        assert_eq!(
            render(&report, 1_000),
            "db.lock: locked\n  Lease: abc\n  Expires in: 500 ms\n"
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["valid_to"], 1_500);
    }

    #[test]
    fn garbage_lock_report() {
        let status = LockStatus::Held {
            lease: None,
            valid: false,
        };
        let report = LockReport::new("db.lock".into(), status);
        assert_eq!(render(&report, 0), "db.lock: locked\n  Body is not a lease\n");
        assert!(serde_json::to_value(&report).unwrap().get("lease_id").is_none());
    }
}
