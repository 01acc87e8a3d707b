//! Markdown documents rendered with minijinja.

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;

const TEMPLATES: [(&str, &str); 6] = [
    ("proposal", include_str!("templates/proposal.md")),
    ("tasks", include_str!("templates/tasks.md")),
    ("task_detail", include_str!("templates/task_detail.md")),
    ("implemented", include_str!("templates/implemented.md")),
    ("context", include_str!("templates/context.md")),
    ("prompt", include_str!("templates/prompt.md")),
];

/// Template engine holding every built-in document template.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load template {name}"))?;
        }
        Ok(Self { env })
    }

    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("get template {name}"))?;
        template
            .render(ctx)
            .with_context(|| format!("render template {name}"))
    }
}
