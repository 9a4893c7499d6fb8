//! HTML for the landing page, the dashboard and the polled event list.

use std::{fmt::Write as _, time::Duration};

use chrono_tz::Tz;
use webhook_dash_core::StoredEvent;

const TIME_FORMAT: &str = "%b %-d, %Y, %-I:%M:%S %p %Z";

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0 auto; max-width: 960px; padding: 24px; color: #1f2933; }
header { display: flex; justify-content: space-between; align-items: center; }
a.button { background: #2563eb; color: #fff; padding: 8px 16px; border-radius: 6px; text-decoration: none; }
.event-container { border: 1px solid #d9e2ec; border-radius: 8px; margin: 16px 0; padding: 16px; }
.timestamp { font-weight: 600; margin-bottom: 8px; }
.metadata { background: #f5f7fa; border-radius: 6px; padding: 8px 12px; margin-bottom: 8px; font-size: 0.9em; }
.metadata-key { font-weight: 600; }
pre { background: #0f172a; color: #e2e8f0; padding: 12px; border-radius: 6px; overflow-x: auto; }
.no-events { color: #52606d; text-align: center; padding: 48px 0; }
"#;

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub timezone: Tz,
    pub refresh_interval: Duration,
    /// Path prefix of every in-app link, ending in `/`.
    pub base_path: String,
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn landing_page(base_path: &str) -> String {
    let body = format!(
        r#"<header><h1>Webhook Dashboard</h1></header>
<p>Sign in to view the most recent webhook deliveries.</p>
<p><a class="button" href="{base}login">Log in</a></p>"#,
        base = escape_html(base_path),
    );
    page("Webhook Dashboard", &body)
}

pub fn dashboard_page(
    viewer: &str,
    events: &[StoredEvent],
    settings: &DashboardSettings,
) -> String {
    let interval_ms = settings.refresh_interval.as_millis().max(1000);
    let body = format!(
        r#"<header><h1>Webhook Dashboard</h1>
<div>Signed in as <strong>{viewer}</strong> <a class="button" href="{base}logout">Log out</a></div></header>
<div id="events" data-source="{base}events">{events}</div>
<script>
setInterval(async () => {{
  const container = document.getElementById('events');
  const response = await fetch(container.dataset.source, {{ credentials: 'same-origin', cache: 'no-store' }});
  if (response.status === 401) {{ window.location.reload(); return; }}
  if (response.ok) {{ container.innerHTML = await response.text(); }}
}}, {interval_ms});
</script>"#,
        base = escape_html(&settings.base_path),
        viewer = escape_html(viewer),
        events = event_list(events, settings.timezone),
    );
    page("Webhook Dashboard", &body)
}

/// Event cards, newest first, numbered from 1.
pub fn event_list(events: &[StoredEvent], timezone: Tz) -> String {
    if events.is_empty() {
        return r#"<div class="no-events"><p>No webhook events received yet.</p></div>"#
            .to_string();
    }

    let mut html = String::from(r#"<div class="events-container">"#);
    for (index, event) in events.iter().enumerate() {
        html.push_str(&event_card(index + 1, event, timezone));
    }
    html.push_str("</div>");
    html
}

fn event_card(number: usize, event: &StoredEvent, timezone: Tz) -> String {
    let received = event.timestamp.with_timezone(&timezone).format(TIME_FORMAT);
    let content_length = event
        .header("content-length")
        .map(|length| format!("{length} bytes"));
    let metadata = [
        ("Source IP", event.source_ip().unwrap_or("Unknown").to_string()),
        (
            "User Agent",
            event.header("user-agent").unwrap_or("Not provided").to_string(),
        ),
        (
            "Content Type",
            event
                .header("content-type")
                .unwrap_or("Not specified")
                .to_string(),
        ),
        (
            "Content Length",
            content_length.unwrap_or_else(|| "Unknown".to_string()),
        ),
        ("Host", event.header("host").unwrap_or("Unknown").to_string()),
    ];
    let payload = serde_json::to_string_pretty(&event.payload)
        .unwrap_or_else(|_| event.payload.to_string());

    let mut card = format!(
        r#"<div class="event-container"><div class="timestamp">Event #{number} received: {received}</div><div class="metadata">"#
    );
    for (key, value) in metadata {
        let _ = write!(
            card,
            r#"<div class="metadata-item"><span class="metadata-key">{key}:</span> {}</div>"#,
            escape_html(&value)
        );
    }
    let _ = write!(card, "</div><pre>{}</pre></div>", escape_html(&payload));
    card
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{STYLE}</style>
</head>
<body>
{body}
</body>
</html>"#,
        title = escape_html(title),
    )
}
