//! Composition of outbound emails: the lifecycle-change digest and
//! operational alerts.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::models::StatusChange;

const STATUS_CHANGE_SUBJECT: &str = "Product lifecycle changes detected";
const MISSING_STATUS: &str = "(none)";

/// One email, ready to hand to a [`crate::traits::Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub text: String,
    pub html: String,
    pub recipients: Vec<String>,
}

/// Build a single digest covering every change, in the order given.
pub fn status_change_notification(
    changes: &[StatusChange],
    recipients: &[String],
) -> Notification {
    let mut text = String::from("The following products changed lifecycle status:\n\n");
    for change in changes {
        let _ = write!(
            text,
            "Product: {}\n  Old Status: {}\n  New Status: {}\n\n",
            change.product_code,
            old_status_label(change),
            change.new_status
        );
    }

    let mut rows = String::new();
    for change in changes {
        let _ = write!(
            rows,
            "\n\t\t<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&change.product_code),
            escape_html(old_status_label(change)),
            escape_html(&change.new_status)
        );
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
	<style>
		body {{ font-family: Arial, sans-serif; }}
		table {{ border-collapse: collapse; width: 100%; margin-top: 20px; }}
		th, td {{ border: 1px solid #ddd; padding: 12px; text-align: left; }}
		th {{ background-color: #4CAF50; color: white; }}
		tr:nth-child(even) {{ background-color: #f2f2f2; }}
	</style>
</head>
<body>
	<h2>Lifecycle Changes Detected</h2>
	<p>The following products changed lifecycle status:</p>
	<table>
		<tr><th>Product Code</th><th>Old Status</th><th>New Status</th></tr>{rows}
	</table>
</body>
</html>"#
    );

    Notification {
        subject: STATUS_CHANGE_SUBJECT.to_string(),
        text,
        html,
        recipients: recipients.to_vec(),
    }
}

/// Build an operational alert for a run that had to be aborted.
pub fn alert_notification(
    context: &str,
    error: &dyn std::fmt::Display,
    at: DateTime<Utc>,
    recipients: &[String],
) -> Notification {
    let timestamp = at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let error = error.to_string();

    let text = format!("Context: {context}\nError: {error}\nTime: {timestamp}");
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
	<style>
		body {{ font-family: Arial, sans-serif; }}
		.error-box {{ background-color: #ffebee; border-left: 4px solid #f44336; padding: 16px; margin: 20px 0; }}
		.label {{ font-weight: bold; color: #333; }}
	</style>
</head>
<body>
	<h2 style="color: #f44336;">Scheduler error</h2>
	<div class="error-box">
		<p><span class="label">Context:</span> {}</p>
		<p><span class="label">Error:</span> {}</p>
		<p><span class="label">Time:</span> {}</p>
	</div>
</body>
</html>"#,
        escape_html(context),
        escape_html(&error),
        timestamp
    );

    Notification {
        subject: format!("Scheduler error - {context}"),
        text,
        html,
        recipients: recipients.to_vec(),
    }
}

fn old_status_label(change: &StatusChange) -> &str {
    change.old_status.as_deref().unwrap_or(MISSING_STATUS)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
