//! Canned provider payloads for replaying realistic webhook deliveries.
//!
//! Identifiers and timestamps are generated on each render, so two replays of
//! the same template never look identical.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateInfo {
    pub service: &'static str,
    pub event: &'static str,
    pub description: &'static str,
}

pub const CATALOG: &[TemplateInfo] = &[
    TemplateInfo {
        service: "stripe",
        event: "payment_intent_succeeded",
        description: "Payment intent completed",
    },
    TemplateInfo {
        service: "stripe",
        event: "payment_intent_failed",
        description: "Payment intent declined",
    },
    TemplateInfo {
        service: "stripe",
        event: "customer_subscription_created",
        description: "New subscription",
    },
    TemplateInfo {
        service: "github",
        event: "push",
        description: "Commits pushed to a branch",
    },
    TemplateInfo {
        service: "github",
        event: "pull_request",
        description: "Pull request opened",
    },
    TemplateInfo {
        service: "shopify",
        event: "order_created",
        description: "Order placed",
    },
    TemplateInfo {
        service: "slack",
        event: "message_sent",
        description: "Bot message posted to a channel",
    },
];

fn token(prefix: &str, len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &hex[..len.min(hex.len())])
}

/// Render the payload for `service`/`event`, or `None` if no such template.
pub fn render(service: &str, event: &str) -> Option<Value> {
    let now = Utc::now();
    let unix = now.timestamp();
    let iso = now.to_rfc3339();

    let payload = match (service, event) {
        ("stripe", "payment_intent_succeeded") => json!({
            "id": token("evt_", 24),
            "object": "event",
            "api_version": "2023-10-16",
            "created": unix,
            "data": { "object": {
                "id": token("pi_", 10),
                "object": "payment_intent",
                "amount": 2000,
                "amount_received": 2000,
                "currency": "usd",
                "payment_method": token("pm_", 10),
                "payment_method_types": ["card"],
                "status": "succeeded",
                "customer": token("cus_", 10),
                "description": "Payment for order #1234",
                "metadata": { "order_id": token("ord_", 8) },
                "created": unix - 60,
            }},
            "type": "payment_intent.succeeded",
            "livemode": false,
        }),
        ("stripe", "payment_intent_failed") => json!({
            "id": token("evt_", 24),
            "object": "event",
            "api_version": "2023-10-16",
            "created": unix,
            "data": { "object": {
                "id": token("pi_", 10),
                "object": "payment_intent",
                "amount": 2000,
                "currency": "usd",
                "payment_method": token("pm_", 10),
                "payment_method_types": ["card"],
                "status": "failed",
                "customer": token("cus_", 10),
                "description": "Payment for order #1234",
                "last_payment_error": {
                    "code": "card_declined",
                    "message": "Your card was declined.",
                    "type": "card_error",
                },
                "metadata": { "order_id": token("ord_", 8) },
                "created": unix - 60,
            }},
            "type": "payment_intent.failed",
            "livemode": false,
        }),
        ("stripe", "customer_subscription_created") => json!({
            "id": token("evt_", 24),
            "object": "event",
            "api_version": "2023-10-16",
            "created": unix,
            "data": { "object": {
                "id": token("sub_", 10),
                "object": "subscription",
                "status": "active",
                "customer": token("cus_", 10),
                "current_period_start": unix,
                "current_period_end": unix + 30 * 24 * 60 * 60,
                "items": { "data": [{
                    "id": token("si_", 10),
                    "price": {
                        "id": token("price_", 10),
                        "product": token("prod_", 10),
                        "active": true,
                        "currency": "usd",
                        "unit_amount": 1500,
                    },
                    "quantity": 1,
                }]},
                "metadata": { "user_id": token("user_", 8) },
                "created": unix,
            }},
            "type": "customer.subscription.created",
            "livemode": false,
        }),
        ("github", "push") => {
            let sha = token("", 32);
            json!({
                "ref": "refs/heads/main",
                "before": token("", 32),
                "after": sha,
                "repository": octocat_repo(&iso),
                "pusher": { "name": "octocat", "email": "octocat@example.com" },
                "sender": octocat(),
                "commits": [{
                    "id": sha,
                    "message": "Fix all the bugs",
                    "timestamp": iso,
                    "author": {
                        "name": "Octocat",
                        "email": "octocat@example.com",
                        "username": "octocat",
                    },
                    "url": format!("https://github.com/octocat/Hello-World/commit/{sha}"),
                }],
                "head_commit": {
                    "id": sha,
                    "message": "Fix all the bugs",
                    "timestamp": iso,
                },
            })
        }
        ("github", "pull_request") => json!({
            "action": "opened",
            "number": 1,
            "pull_request": {
                "url": "https://api.github.com/repos/octocat/Hello-World/pulls/1",
                "id": 1,
                "html_url": "https://github.com/octocat/Hello-World/pull/1",
                "state": "open",
                "title": "Amazing new feature",
                "user": octocat(),
                "body": "Please pull these awesome changes in!",
                "created_at": iso,
                "updated_at": iso,
                "head": { "label": "octocat:new-feature", "ref": "new-feature", "sha": token("", 32) },
                "base": { "label": "octocat:main", "ref": "main", "sha": token("", 32) },
            },
            "repository": octocat_repo(&iso),
            "sender": octocat(),
        }),
        ("shopify", "order_created") => json!({
            "id": 820982911946154508_u64,
            "email": "jon@example.com",
            "created_at": iso,
            "updated_at": iso,
            "number": 234,
            "note": null,
            "token": token("", 32),
            "total_price": "403.00",
            "subtotal_price": "393.00",
            "total_tax": "0.00",
            "currency": "USD",
            "financial_status": "voided",
            "name": "#9999",
            "line_items": [{
                "id": 866550311766439020_u64,
                "title": "Aviator sunglasses",
                "quantity": 1,
                "price": "199.00",
                "sku": "SKU2006-001",
                "vendor": null,
            }, {
                "id": 141249953214522974_u64,
                "title": "Mid-century lounger",
                "quantity": 1,
                "price": "194.00",
                "sku": "SKU2006-020",
                "vendor": null,
            }],
            "shipping_address": {
                "first_name": "Steve",
                "last_name": "Shipper",
                "address1": "123 Shipping Street",
                "city": "Shippington",
                "province": "Kentucky",
                "country": "United States",
                "zip": "40003",
            },
            "customer": {
                "id": 115310627,
                "email": "bob.norman@hostmail.com",
                "first_name": "Bob",
                "last_name": "Norman",
                "orders_count": 1,
                "total_spent": "41.94",
            },
        }),
        ("slack", "message_sent") => json!({
            "token": "ZZZZZZWSxiZZZ2yIvs3peJ",
            "team_id": "T123ABC456",
            "api_app_id": "A123ABC456",
            "event": {
                "type": "message",
                "subtype": "bot_message",
                "text": "Hello, World!",
                "ts": format!("{unix}.000400"),
                "username": "NotificationBot",
                "bot_id": "B123ABC456",
                "channel": "C123ABC456",
                "event_ts": format!("{unix}.000400"),
                "channel_type": "channel",
            },
            "type": "event_callback",
            "event_id": token("Ev", 9),
            "event_time": unix,
            "authed_users": ["U123ABC456"],
        }),
        _ => return None,
    };
    Some(payload)
}

fn octocat() -> Value {
    json!({
        "login": "octocat",
        "id": 1,
        "node_id": "MDQ6VXNlcjE=",
        "avatar_url": "https://github.com/images/error/octocat_happy.gif",
        "url": "https://api.github.com/users/octocat",
    })
}

fn octocat_repo(iso: &str) -> Value {
    json!({
        "id": 1296269,
        "node_id": "MDEwOlJlcG9zaXRvcnkxMjk2MjY5",
        "name": "Hello-World",
        "full_name": "octocat/Hello-World",
        "owner": octocat(),
        "html_url": "https://github.com/octocat/Hello-World",
        "description": "This your first repo!",
        "created_at": iso,
        "updated_at": iso,
        "pushed_at": iso,
    })
}
