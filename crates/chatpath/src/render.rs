//! Fill context tokens in an utterance before it is spoken.

use chrono::Timelike;

pub const TIME_OF_DAY_TOKEN: &str = "{time-of-day}";
pub const NAME_TOKEN: &str = "{name}";

/// What a line may refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    /// Local hour, 0-23.
    pub hour: u32,
    /// Recognized visitor, if any.
    pub name: Option<String>,
}

impl RenderContext {
    pub fn now(name: Option<String>) -> Self {
        Self {
            hour: chrono::Local::now().hour(),
            name,
        }
    }
}

pub fn time_of_day(hour: u32) -> &'static str {
    match hour {
        0..=11 => "morning",
        12..=17 => "afternoon",
        _ => "evening",
    }
}

pub fn render(text: &str, ctx: &RenderContext) -> String {
    text.replace(TIME_OF_DAY_TOKEN, time_of_day(ctx.hour))
        .replace(NAME_TOKEN, ctx.name.as_deref().unwrap_or("there"))
}
