//! Outbound message composition.

use chrono::{DateTime, Utc};
use serde_json::json;

use trax_core::events::EventRecord;
use trax_core::validation::is_valid_url;

use crate::mail::{OutboundEmail, escape_html};

pub struct InviteEmail<'a> {
    pub app_base_url: &'a str,
    pub event: &'a EventRecord,
    pub event_id: &'a str,
    pub invitation_id: &'a str,
    pub token: &'a str,
    pub invitation_code: &'a str,
    pub guest_id: Option<&'a str>,
    pub guest_email: &'a str,
    pub guest_name: &'a str,
    pub batch_id: Option<&'a str>,
    pub expiry_days: i64,
}

/// Guest link carrying the invitation id and its token.
pub fn guest_link(app_base_url: &str, invitation_id: &str, token: &str) -> String {
    let mut url = format!("{}/guest-response", app_base_url.trim_end_matches('/'));
    url.push_str("?invitationId=");
    url.push_str(&encode_component(invitation_id));
    url.push_str("&token=");
    url.push_str(&encode_component(token));
    url
}

fn encode_component(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn format_event_date(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(|t| t.format("%A, %B %-d, %Y %H:%M UTC").to_string())
}

pub fn invitation(msg: &InviteEmail<'_>) -> OutboundEmail {
    let event_name = msg.event.display_name();
    let address = msg.event.address.as_deref().unwrap_or_default().trim();
    let start = format_event_date(msg.event.start_date_time);
    let end = format_event_date(msg.event.end_date_time);
    let link = guest_link(msg.app_base_url, msg.invitation_id, msg.token);
    let greeting = if msg.guest_name.is_empty() {
        "Hello".to_string()
    } else {
        format!("Hello {}", msg.guest_name)
    };

    let mut text = format!("{greeting},\n\nYou're invited to {event_name}!\n\n");
    if !address.is_empty() {
        text.push_str(&format!("Location: {address}\n"));
    }
    if let Some(start) = &start {
        text.push_str(&format!("Start: {start}\n"));
    }
    if let Some(end) = &end {
        text.push_str(&format!("End: {end}\n"));
    }
    text.push_str(&format!(
        "\nPlease open this link to RSVP, complete your details, and select your menu preferences:\n{link}\n\n\
         This link expires in {} days.\n\nInvitation Code: {}\n\nThank you,\nTrax Event",
        msg.expiry_days, msg.invitation_code
    ));

    let cover = msg
        .event
        .cover_image_url
        .as_deref()
        .filter(|u| is_valid_url(u))
        .map(|u| {
            format!(
                r#"<img src="{}" alt="{}" style="width:100%;max-width:600px;border-radius:8px" />"#,
                escape_html(u),
                escape_html(&event_name)
            )
        })
        .unwrap_or_default();
    let mut details = String::new();
    for (label, value) in [("Start", start.as_deref()), ("End", end.as_deref()), ("Location", Some(address))] {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            details.push_str(&format!("<p><strong>{label}:</strong> {}</p>", escape_html(value)));
        }
    }
    let mut reference = format!(
        "Invitation Code: <strong>{}</strong>",
        escape_html(msg.invitation_code)
    );
    if let Some(batch_id) = msg.batch_id {
        reference.push_str(&format!("<br/>Batch ID: <strong>{}</strong>", escape_html(batch_id)));
    }
    let html = format!(
        r#"<div style="font-family:sans-serif;max-width:600px;margin:0 auto">{cover}
<h1>You're Invited!</h1>
<p>{greeting},</p>
<p>You have been invited to <strong>{event}</strong>!</p>
{details}
<p><a href="{href}">Accept Invitation &amp; RSVP</a></p>
<p>If the button doesn't work, copy and paste this link into your browser: {href}</p>
<p>This invitation link expires in {days} days.</p>
<p>{reference}</p>
<p>Thank you,<br/><strong>Trax Event</strong></p></div>"#,
        greeting = escape_html(&greeting),
        event = escape_html(&event_name),
        href = escape_html(&link),
        days = msg.expiry_days,
    );

    let mut metadata = serde_json::Map::new();
    metadata.insert("invitationId".into(), json!(msg.invitation_id));
    metadata.insert("eventId".into(), json!(msg.event_id));
    metadata.insert("guestId".into(), json!(msg.guest_id.unwrap_or_default()));
    metadata.insert("invitationCode".into(), json!(msg.invitation_code));

    OutboundEmail {
        to: msg.guest_email.to_string(),
        subject: format!("You're Invited to {event_name}!"),
        html_body: html,
        text_body: text,
        metadata,
    }
}

/// Onboarding mail for a host: password link plus the portal address.
pub fn host_welcome(
    to: &str,
    host_name: Option<&str>,
    reset_link: &str,
    portal_url: &str,
) -> OutboundEmail {
    let greeting = match host_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Hello {name}"),
        None => "Hello".to_string(),
    };
    let text = format!(
        "{greeting},\n\nYou have been added as a host on Trax Event.\n\n\
         Set up your password here (the link expires in 1 hour):\n{reset_link}\n\n\
         Once your password is set, sign in to the Host Portal:\n{portal_url}\n\n\
         Thank you,\nTrax Event"
    );
    let html = format!(
        r#"<div style="font-family:sans-serif;max-width:600px;margin:0 auto">
<h1>Welcome to Trax Host Portal</h1>
<p>{greeting},</p>
<p>You have been added as a host on Trax Event.</p>
<p><a href="{reset}">Set Up Your Password</a></p>
<p>This link expires in 1 hour.</p>
<p>Once your password is set, sign in at <a href="{portal}">{portal}</a>.</p>
<p>Thank you,<br/><strong>Trax Event</strong></p></div>"#,
        greeting = escape_html(&greeting),
        reset = escape_html(reset_link),
        portal = escape_html(portal_url),
    );
    let mut metadata = serde_json::Map::new();
    metadata.insert("kind".into(), json!("host-welcome"));
    OutboundEmail {
        to: to.to_string(),
        subject: "Welcome to Trax Host Portal - Set Up Your Password".to_string(),
        html_body: html,
        text_body: text,
        metadata,
    }
}

/// Password set-up mail for a sales portal account.
pub fn sales_welcome(to: &str, name: &str, reset_link: &str, portal_url: &str) -> OutboundEmail {
    let text = format!(
        "Hello {name},\n\nYour Trax Sales Portal account has been created. \
         Set up your password here:\n\n{reset_link}\n\n\
         This link will expire in 1 hour.\n\n\
         Once your password is set, sign in to the sales portal:\n{portal_url}\n\n\
         Trax Sales Portal"
    );
    let html = format!(
        r#"<div style="font-family:sans-serif;max-width:600px;margin:0 auto">
<h2>Welcome to Trax Sales Portal</h2>
<p>Hello {name},</p>
<p>Your Trax Sales Portal account has been created as a Sales Person.</p>
<p><a href="{reset}">Set Up Password</a></p>
<p>After setting up your password, open the Sales Portal at <a href="{portal}">{portal}</a>.</p>
<p><strong>Note:</strong> This link will expire in 1 hour.</p>
<p>Trax Sales Portal</p></div>"#,
        name = escape_html(name),
        reset = escape_html(reset_link),
        portal = escape_html(portal_url),
    );
    let mut metadata = serde_json::Map::new();
    metadata.insert("kind".into(), json!("sales-welcome"));
    OutboundEmail {
        to: to.to_string(),
        subject: "Set Up Your Trax Sales Portal Password".to_string(),
        html_body: html,
        text_body: text,
        metadata,
    }
}
