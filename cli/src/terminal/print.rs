use colored::*;
use tracing::info;

pub const TOTAL_WIDTH: usize = 64;
pub const PRINT_TARGET: &str = "uwalker::print";

pub fn print(msg: &str) {
    info!(target: PRINT_TARGET, "{msg}");
}

pub fn header(msg: &str) {
    let formatted: String = format!("⟦ {} ⟧", msg);
    let msg_len: usize = formatted.chars().count();

    let dash_count: usize = TOTAL_WIDTH.saturating_sub(msg_len);
    let left: usize = dash_count / 2;
    let right: usize = dash_count - left;

    let line: ColoredString = format!(
        "{}{}{}",
        "─".repeat(left),
        formatted.to_uppercase().bright_green(),
        "─".repeat(right)
    )
    .bright_black();

    print(&format!("{}", line));
}

pub fn print_status<T: AsRef<str>>(msg: T) {
    let prefix: ColoredString = ">".bright_black();
    print(&format!("{} {}", prefix, msg.as_ref()));
}

pub fn aligned_line<V: std::fmt::Display>(key: &str, value: V) {
    const KEY_WIDTH: usize = 12;
    let dots: String = ".".repeat(KEY_WIDTH.saturating_sub(key.len()));
    print_status(format!(
        "{}{}{} {}",
        key.cyan(),
        dots.bright_black(),
        ":".bright_black(),
        value
    ));
}

pub fn end_of_program() {
    print(&format!("{}", "═".repeat(TOTAL_WIDTH).bright_black()));
}
