// Output formatting for the CLI

use crate::runtime::ComponentSummary;
use colored::*;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print the startup banner
pub fn print_banner(version: &str, pid: u32) {
    println!(
        "{} {} {}",
        "foreman".green().bold(),
        format!("v{}", version).cyan(),
        format!("(pid {})", pid).dimmed()
    );
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Address")]
    address: String,
}

/// Render the configured components as a table
pub fn component_table(components: &[ComponentSummary]) -> String {
    let rows: Vec<ComponentRow> = components
        .iter()
        .map(|c| ComponentRow {
            name: truncate(&c.name, 24),
            class: c.class.to_string(),
            kind: c.kind.clone(),
            address: c.address.clone(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

/// Print the configured components
pub fn print_components(components: &[ComponentSummary]) {
    if components.is_empty() {
        println!("{}", "No components configured".yellow());
        return;
    }

    println!("\n{}\n", component_table(components));
    println!(
        "{}",
        format!("Total: {} component(s)", components.len())
            .dimmed()
            .italic()
    );
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
    }

    #[test]
    fn test_component_table_lists_every_component() {
        let components = vec![
            ComponentSummary {
                name: "echo".to_string(),
                class: "reload server",
                kind: "echo".to_string(),
                address: "tcp://127.0.0.1:7878".to_string(),
            },
            ComponentSummary {
                name: "heartbeat".to_string(),
                class: "cron",
                kind: "cron".to_string(),
                address: "-".to_string(),
            },
        ];

        let table = component_table(&components);
        assert!(table.contains("Name"));
        assert!(table.contains("tcp://127.0.0.1:7878"));
        assert!(table.contains("heartbeat"));
    }
}
