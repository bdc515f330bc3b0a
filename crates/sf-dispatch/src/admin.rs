//! Administrative input for subscriptions

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use sf_common::{EventKind, Subscription, ValidationError, Violations};

/// Fields an administrator supplies when creating or replacing a subscription
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInput {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    pub events: BTreeSet<EventKind>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

fn is_absolute_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or("");
            !host.is_empty() && !url.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

impl SubscriptionInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Violations::new();
        v.required("name", &self.name);
        v.check(
            is_absolute_http_url(&self.url),
            "url",
            "must be an absolute http or https URL",
        );
        v.check(!self.events.is_empty(), "events", "must contain at least one event kind");
        if let Some(secret) = &self.secret {
            v.required("secret", secret);
        }
        for (name, value) in &self.headers {
            v.check(
                is_header_name(name),
                format!("headers.{}", name),
                "is not a valid HTTP header name",
            );
            v.check(
                !value.contains(['\r', '\n']),
                format!("headers.{}", name),
                "must not contain line breaks",
            );
        }
        v.into_result()
    }

    pub fn into_subscription(self) -> Subscription {
        let mut subscription = Subscription::new(self.name, self.url, self.events);
        subscription.secret = self.secret;
        subscription.headers = self.headers;
        subscription.active = self.active;
        subscription
    }

    /// Replace every administrable field of `existing`
    pub fn apply_to(self, existing: &Subscription) -> Subscription {
        Subscription {
            name: self.name,
            url: self.url,
            secret: self.secret,
            active: self.active,
            events: self.events,
            headers: self.headers,
            updated_at: chrono::Utc::now(),
            ..existing.clone()
        }
    }
}
