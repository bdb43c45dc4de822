//! Minimal server-rendered pages.
//!
//! Templates are embedded in the binary. Handlebars escapes every `{{value}}`
//! for HTML, so usernames and flash messages render inert.

use std::sync::Arc;

use axum::response::Html;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::Context;
use crate::types::Permission;

const PARTIALS: &[(&str, &str)] = &[
    ("header", include_str!("../templates/partials/header.hbs")),
    ("flashes", include_str!("../templates/partials/flashes.hbs")),
    ("footer", include_str!("../templates/partials/footer.hbs")),
];

const PAGES: &[(&str, &str)] = &[
    ("login", include_str!("../templates/login.hbs")),
    ("reset_password", include_str!("../templates/reset_password.hbs")),
    ("dashboard", include_str!("../templates/dashboard.hbs")),
    ("settings", include_str!("../templates/settings.hbs")),
    ("users", include_str!("../templates/users.hbs")),
];

#[derive(Clone)]
pub struct Views {
    handlebars: Arc<Handlebars<'static>>,
}

impl Views {
    pub fn new() -> anyhow::Result<Self> {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(false);
        for (name, source) in PARTIALS {
            hb.register_partial(name, *source)
                .map_err(|e| anyhow::anyhow!("Failed to register partial {}: {}", name, e))?;
        }
        for (name, source) in PAGES {
            hb.register_template_string(name, *source)
                .map_err(|e| anyhow::anyhow!("Failed to register template {}: {}", name, e))?;
        }
        Ok(Self { handlebars: Arc::new(hb) })
    }

    pub fn render(&self, name: &str, data: &impl Serialize) -> AppResult<Html<String>> {
        self.handlebars
            .render(name, data)
            .map(Html)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to render {}: {}", name, e)))
    }
}

/// Template data shared by every page: title, user, flashes and the form token.
///
/// Draining the flash queue here means a notice is shown exactly once.
pub async fn page(ctx: &Context, title: &str, extra: Value) -> Value {
    let user = ctx.user();
    let mut data = json!({
        "title": title,
        "user": user,
        "is_admin": user.map(|u| u.has_permission(Permission::ModifySystem)).unwrap_or(false),
        "impersonating": ctx.impersonator().await.is_some(),
        "flashes": ctx.take_flashes().await,
        "csrf_token": ctx.csrf_token().await,
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut data, extra) {
        base.extend(extra);
    }
    data
}
