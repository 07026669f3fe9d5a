/// The placeholder replaced with the current kill count.
pub const KILLS_TOKEN: &str = "(kills)";

/// Render a message template, replacing every `(kills)` with `kill_count`.
pub fn render(template: &str, kill_count: u32) -> String {
    template.replace(KILLS_TOKEN, &kill_count.to_string())
}
